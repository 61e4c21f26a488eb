//! Shutdown notifications.
//!
//! A [`Notifier`] is returned by every registration. For channel-style
//! registrations the owner waits on it, receives one [`Activation`] when its
//! stage fires and acknowledges by calling [`Activation::done`] once its own
//! shutdown work is finished. For callback-style registrations the coordinator
//! runs the callback itself and then delivers a single, already acknowledged
//! activation so observers can tell the callback has run.
//!
//! In both cases the notifier's channel disconnects after the one activation,
//! and it disconnects without any activation if the entry was cancelled or
//! registered too late for its stage.

use crate::coordinator::Shared;
use crate::panic::catch_panic;
use crate::stage::Stage;
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Weak;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Delivered to a registrant when its stage is dispatched.
///
/// Dropping the activation acknowledges it; [`Activation::done`] makes that
/// explicit at the call site.
#[derive(Debug)]
#[must_use = "the stage waits until the activation is acknowledged or dropped"]
pub struct Activation {
    _ack: Sender<()>,
}

impl Activation {
    fn new(ack: Sender<()>) -> Self {
        Self { _ack: ack }
    }

    /// An activation nobody waits on; used to report that a callback ran.
    fn settled() -> Self {
        let (ack, _) = crossbeam_channel::bounded(0);
        Self::new(ack)
    }

    /// Acknowledge that this entry's shutdown work is complete.
    pub fn done(self) {}
}

/// Callback registered to run during a stage.
pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A registered, not yet dispatched notification.
pub(crate) enum Entry {
    /// The registrant listens on the paired notifier and acknowledges itself.
    Channel(Sender<Activation>),
    /// The coordinator runs the callback and acknowledges on its behalf.
    Callback {
        call: Callback,
        notify: Sender<Activation>,
    },
}

impl Entry {
    /// Fire this entry, returning a receiver that disconnects once the entry
    /// has acknowledged.
    pub(crate) fn dispatch(self, stage: Stage) -> Receiver<()> {
        let (ack, acked) = crossbeam_channel::bounded(0);
        match self {
            Entry::Channel(notify) => {
                // A dropped notifier hands the activation back, which
                // acknowledges immediately.
                if notify.send(Activation::new(ack)).is_err() {
                    debug!(stage = %stage, "notifier dropped before dispatch");
                }
            }
            Entry::Callback { call, notify } => {
                let spawned = thread::Builder::new()
                    .name(format!("stagewise-{}", stage))
                    .spawn(move || {
                        if let Err(message) = catch_panic(call) {
                            error!(stage = %stage, panic = %message, "shutdown callback panicked");
                        }
                        let _ = notify.send(Activation::settled());
                        drop(notify);
                        drop(ack);
                    });
                if let Err(err) = spawned {
                    error!(stage = %stage, error = %err, "failed to spawn shutdown callback thread");
                }
            }
        }
        acked
    }
}

/// Identity of an admitted entry, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryKey {
    pub(crate) stage: Stage,
    pub(crate) id: u64,
}

/// Handle to a shutdown registration.
///
/// Receive from it to learn that the stage has fired, or call
/// [`Notifier::cancel`] to withdraw the registration.
pub struct Notifier {
    rx: Receiver<Activation>,
    stage: Stage,
    key: Option<EntryKey>,
    shared: Weak<Shared>,
}

impl Notifier {
    pub(crate) fn new(
        rx: Receiver<Activation>,
        stage: Stage,
        key: Option<EntryKey>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            rx,
            stage,
            key,
            shared,
        }
    }

    /// The stage this notifier was registered for.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// True if the registration arrived after its stage had already been
    /// dispatched, so it will never fire.
    pub fn is_inert(&self) -> bool {
        self.key.is_none()
    }

    /// Block until the stage fires.
    ///
    /// Returns an error if the entry was cancelled, was inert, or has already
    /// delivered its activation.
    pub fn recv(&self) -> Result<Activation, RecvError> {
        self.rx.recv()
    }

    /// Block until the stage fires or `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Activation, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Check for an activation without blocking.
    pub fn try_recv(&self) -> Result<Activation, TryRecvError> {
        self.rx.try_recv()
    }

    /// The underlying channel, for use with `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<Activation> {
        &self.rx
    }

    /// Withdraw the registration.
    ///
    /// Has no effect once the stage has been dispatched, if the entry was
    /// already cancelled, or if it was inert.
    pub fn cancel(&self) {
        let (Some(key), Some(shared)) = (self.key, self.shared.upgrade()) else {
            return;
        };
        let removed = shared.state.lock().registry.cancel(key);
        if let Some(entry) = removed {
            debug!(stage = %key.stage, id = key.id, "shutdown notification cancelled");
            drop(entry);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("stage", &self.stage)
            .field("inert", &self.is_inert())
            .finish()
    }
}
