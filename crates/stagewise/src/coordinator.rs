//! The shutdown sequence.

use crate::config::ShutdownConfig;
use crate::error::{Error, Result};
use crate::gate::{self, Gate, GateGuard};
use crate::notifier::{Activation, Entry, Notifier};
use crate::registry::Registry;
use crate::stage::Stage;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Everything guarded by the coordinator lock.
#[derive(Default)]
pub(crate) struct State {
    pub(crate) gate: Gate,
    pub(crate) registry: Registry,
    pub(crate) config: ShutdownConfig,
}

/// State shared between a coordinator, its notifiers and gate guards.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    /// Signalled when the last gate holder leaves.
    pub(crate) released: Condvar,
    /// Signalled when the sequence has finished.
    pub(crate) finished: Condvar,
    /// Mirror of the gate's closed flag, readable without the lock.
    pub(crate) started: AtomicBool,
}

impl Shared {
    pub(crate) fn release(&self) {
        let drained = self.state.lock().gate.release();
        if drained {
            self.released.notify_all();
        }
    }
}

/// Coordinates a three-stage shutdown.
///
/// The coordinator is a cheap handle: clones share the same registrations,
/// gate and sequence. Most programs use the single process instance in
/// [`crate::global`]; tests and embedded uses construct their own.
#[derive(Clone, Default)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Create a coordinator with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coordinator with the given configuration.
    pub fn with_config(config: ShutdownConfig) -> Self {
        let coordinator = Self::new();
        coordinator.shared.state.lock().config = config;
        coordinator
    }

    /// Current configuration.
    pub fn config(&self) -> ShutdownConfig {
        self.shared.state.lock().config.clone()
    }

    /// Set the wait bound for the gate drain and every stage.
    ///
    /// Takes effect for a sequence that has not started yet.
    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.state.lock().config.set_timeout(timeout);
    }

    /// Override the wait bound for a single stage.
    pub fn set_stage_timeout(&self, stage: Stage, timeout: Duration) {
        self.shared
            .state
            .lock()
            .config
            .set_stage_timeout(stage, timeout);
    }

    /// Register for the first stage.
    pub fn first(&self) -> Notifier {
        self.register(Stage::First)
    }

    /// Register for the second stage.
    pub fn second(&self) -> Notifier {
        self.register(Stage::Second)
    }

    /// Register for the third stage.
    pub fn third(&self) -> Notifier {
        self.register(Stage::Third)
    }

    /// Register to receive an [`Activation`] when `stage` fires.
    ///
    /// The stage does not complete until the activation is acknowledged or
    /// its timeout elapses. Registering for a stage that has already been
    /// dispatched returns an inert notifier.
    pub fn register(&self, stage: Stage) -> Notifier {
        self.admit(stage, Entry::Channel)
    }

    /// Run `f(arg)` during the first stage.
    pub fn first_func<F, A>(&self, f: F, arg: A) -> Notifier
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        self.register_func(Stage::First, f, arg)
    }

    /// Run `f(arg)` during the second stage.
    pub fn second_func<F, A>(&self, f: F, arg: A) -> Notifier
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        self.register_func(Stage::Second, f, arg)
    }

    /// Run `f(arg)` during the third stage.
    pub fn third_func<F, A>(&self, f: F, arg: A) -> Notifier
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        self.register_func(Stage::Third, f, arg)
    }

    /// Run `f(arg)` on its own thread when `stage` fires.
    ///
    /// The stage counts the entry as acknowledged once `f` returns. A panic in
    /// `f` is caught and logged. The returned notifier receives a single
    /// activation after `f` has run, then disconnects.
    ///
    /// A pending callback is owned by the coordinator, so a callback that
    /// captures a clone of this coordinator keeps it alive until the stage
    /// runs or the notifier is cancelled.
    pub fn register_func<F, A>(&self, stage: Stage, f: F, arg: A) -> Notifier
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        self.admit(stage, move |notify| Entry::Callback {
            call: Box::new(move || f(arg)),
            notify,
        })
    }

    fn admit(&self, stage: Stage, entry: impl FnOnce(Sender<Activation>) -> Entry) -> Notifier {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let admitted = self.shared.state.lock().registry.admit(stage, entry(tx));
        let key = match admitted {
            Ok(key) => Some(key),
            Err(entry) => {
                debug!(stage = %stage, "stage already dispatched, registration ignored");
                drop(entry);
                None
            }
        };
        Notifier::new(rx, stage, key, Arc::downgrade(&self.shared))
    }

    /// Number of entries waiting for `stage`.
    pub fn pending(&self, stage: Stage) -> usize {
        self.shared.state.lock().registry.pending(stage)
    }

    /// Admit protected work.
    ///
    /// Returns false once shutdown has started. Every `true` must be paired
    /// with exactly one [`Coordinator::unlock`].
    pub fn lock(&self) -> bool {
        self.shared.state.lock().gate.acquire()
    }

    /// Release protected work admitted by [`Coordinator::lock`].
    pub fn unlock(&self) {
        self.shared.release();
    }

    /// Admit protected work for the lifetime of the returned guard.
    pub fn enter(&self) -> Result<GateGuard> {
        if self.lock() {
            Ok(GateGuard::new(self.shared.clone()))
        } else {
            Err(Error::ShutdownStarted)
        }
    }

    /// Number of currently admitted holders of the gate.
    pub fn holders(&self) -> usize {
        self.shared.state.lock().gate.holders()
    }

    /// True once [`Coordinator::shutdown`] has been called.
    pub fn started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// True once the shutdown sequence has run to the end.
    pub fn completed(&self) -> bool {
        self.shared.state.lock().registry.is_finished()
    }

    /// The last stage that has been dispatched, if any.
    pub fn reached(&self) -> Option<Stage> {
        self.shared.state.lock().registry.reached()
    }

    /// Block until a shutdown sequence has completed.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while !state.registry.is_finished() {
            self.shared.finished.wait(&mut state);
        }
    }

    /// Run the shutdown sequence and block until it has finished.
    ///
    /// Closes the admission gate, waits for admitted work to be released, then
    /// dispatches the first, second and third stage in order. Each of those
    /// waits is bounded by the configured timeout, so this always returns.
    ///
    /// Only the first call runs the sequence; later calls block until it has
    /// finished. A stage handler calling this therefore holds up its own stage
    /// until that stage times out.
    pub fn shutdown(&self) {
        let config = {
            let mut state = self.shared.state.lock();
            if !state.gate.close() {
                drop(state);
                debug!("shutdown already started, waiting for it to finish");
                self.wait();
                return;
            }
            self.shared.started.store(true, Ordering::SeqCst);
            state.config.clone()
        };

        let span = info_span!("shutdown");
        let _enter = span.enter();
        let started_at = Instant::now();
        info!(timeout_ms = config.timeout_ms, "shutdown started");

        if !gate::drain(&self.shared, config.timeout()) {
            warn!(
                holders = self.holders(),
                timeout_ms = config.timeout_ms,
                "timed out waiting for protected work to finish"
            );
        }

        for stage in Stage::ALL {
            let entries = self.shared.state.lock().registry.open(stage);
            run_stage(stage, entries, config.stage_timeout(stage));
        }

        let leftover = {
            let mut state = self.shared.state.lock();
            state.registry.finish()
        };
        drop(leftover);
        self.shared.finished.notify_all();

        info!(
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "shutdown complete"
        );
    }

    /// Run the shutdown sequence from async code without blocking the
    /// runtime's worker threads.
    pub async fn shutdown_async(&self) {
        let coordinator = self.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || coordinator.shutdown()).await {
            warn!(error = %err, "shutdown task did not run to completion");
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Coordinator")
            .field("started", &state.gate.is_closed())
            .field("holders", &state.gate.holders())
            .field("reached", &state.registry.reached())
            .field("config", &state.config)
            .finish()
    }
}

/// Dispatch one stage and wait for its acknowledgments.
fn run_stage(stage: Stage, entries: Vec<Entry>, timeout: Duration) {
    let span = info_span!("stage", stage = %stage);
    let _enter = span.enter();

    if entries.is_empty() {
        debug!("no entries registered");
        return;
    }

    let total = entries.len();
    debug!(entries = total, "dispatching stage");
    let acks: Vec<Receiver<()>> = entries.into_iter().map(|e| e.dispatch(stage)).collect();

    let deadline = Instant::now().checked_add(timeout);
    let outstanding = acks
        .iter()
        .filter(|ack| !acknowledged(ack, deadline))
        .count();

    if outstanding > 0 {
        warn!(
            outstanding,
            entries = total,
            timeout_ms = timeout.as_millis() as u64,
            "stage timed out waiting for acknowledgments"
        );
    } else {
        debug!(entries = total, "stage acknowledged");
    }
}

/// Wait for an entry's acknowledgment channel to disconnect.
fn acknowledged(ack: &Receiver<()>, deadline: Option<Instant>) -> bool {
    loop {
        let received = match deadline {
            Some(deadline) => ack.recv_deadline(deadline),
            None => ack.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(()) => continue,
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}
