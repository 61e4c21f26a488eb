//! The process-wide coordinator.
//!
//! Shutdown is a property of the whole process, so most code registers with
//! one shared [`Coordinator`]. It is built on first use from the `STAGEWISE_*`
//! environment variables (see [`crate::config::vars`]), falling back to the
//! defaults if they are invalid. The functions here forward to it.

use crate::config::ShutdownConfig;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::gate::GateGuard;
use crate::notifier::Notifier;
use crate::stage::Stage;
use once_cell::sync::Lazy;
use std::time::Duration;
use tracing::warn;

static GLOBAL: Lazy<Coordinator> = Lazy::new(|| {
    let config = ShutdownConfig::from_env().unwrap_or_else(|err| {
        warn!(error = %err, "ignoring invalid shutdown configuration from environment");
        ShutdownConfig::default()
    });
    Coordinator::with_config(config)
});

/// The process-wide coordinator.
pub fn global() -> &'static Coordinator {
    &GLOBAL
}

/// Set the wait bound for the gate drain and every stage.
pub fn set_timeout(timeout: Duration) {
    GLOBAL.set_timeout(timeout);
}

/// Override the wait bound for one stage.
pub fn set_stage_timeout(stage: Stage, timeout: Duration) {
    GLOBAL.set_stage_timeout(stage, timeout);
}

/// Register for the first stage.
pub fn first() -> Notifier {
    GLOBAL.first()
}

/// Register for the second stage.
pub fn second() -> Notifier {
    GLOBAL.second()
}

/// Register for the third stage.
pub fn third() -> Notifier {
    GLOBAL.third()
}

/// Run `f(arg)` during the first stage.
pub fn first_func<F, A>(f: F, arg: A) -> Notifier
where
    F: FnOnce(A) + Send + 'static,
    A: Send + 'static,
{
    GLOBAL.first_func(f, arg)
}

/// Run `f(arg)` during the second stage.
pub fn second_func<F, A>(f: F, arg: A) -> Notifier
where
    F: FnOnce(A) + Send + 'static,
    A: Send + 'static,
{
    GLOBAL.second_func(f, arg)
}

/// Run `f(arg)` during the third stage.
pub fn third_func<F, A>(f: F, arg: A) -> Notifier
where
    F: FnOnce(A) + Send + 'static,
    A: Send + 'static,
{
    GLOBAL.third_func(f, arg)
}

/// Admit protected work; false once shutdown has started.
pub fn lock() -> bool {
    GLOBAL.lock()
}

/// Release protected work admitted by [`lock`].
pub fn unlock() {
    GLOBAL.unlock();
}

/// Admit protected work for the lifetime of the returned guard.
pub fn enter() -> Result<GateGuard> {
    GLOBAL.enter()
}

/// Run the shutdown sequence, blocking until it has finished.
pub fn shutdown() {
    GLOBAL.shutdown();
}

/// True once [`shutdown`] has been called.
pub fn started() -> bool {
    GLOBAL.started()
}

/// Block until the shutdown sequence has completed.
pub fn wait() {
    GLOBAL.wait();
}
