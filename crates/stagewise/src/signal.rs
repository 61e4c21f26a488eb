//! OS signal integration.
//!
//! Listens for SIGINT and SIGTERM (Ctrl-C elsewhere) and runs the shutdown
//! sequence when one arrives. Exiting the process afterwards is left to the
//! caller.

use crate::coordinator::Coordinator;
use crate::error::Result;
use tracing::info;

/// Installed termination signal handlers.
///
/// Handlers are installed by [`SignalListener::install`], so signals raised
/// after that call are not lost even if nothing is awaiting yet. Must be
/// created inside a Tokio runtime.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Install handlers for the termination signals.
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Install handlers for the termination signals.
    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next termination signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Result<()> {
        tokio::select! {
            _ = self.interrupt.recv() => info!("received SIGINT"),
            _ = self.terminate.recv() => info!("received SIGTERM"),
        }
        Ok(())
    }

    /// Wait for the next termination signal.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl-C");
        Ok(())
    }
}

/// Wait for a termination signal, then run `coordinator`'s shutdown sequence.
///
/// ```no_run
/// # async fn run() -> stagewise::Result<()> {
/// let coordinator = stagewise::global::global().clone();
/// tokio::spawn(stagewise::signal::shutdown_on_signal(coordinator));
/// # Ok(())
/// # }
/// ```
pub async fn shutdown_on_signal(coordinator: Coordinator) -> Result<()> {
    let mut listener = SignalListener::install()?;
    listener.recv().await?;
    coordinator.shutdown_async().await;
    Ok(())
}
