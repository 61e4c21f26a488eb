//! Staged shutdown coordination.
//!
//! Components register for one of three ordered shutdown stages, either by
//! listening on a [`Notifier`] and acknowledging the [`Activation`] they
//! receive, or by handing over a callback that is run on their behalf.
//! A single call to [`Coordinator::shutdown`] then:
//!
//! 1. closes the admission gate so [`Coordinator::lock`] stops admitting work,
//! 2. waits (bounded) for admitted work to call [`Coordinator::unlock`],
//! 3. fires stage one, two and three in order, waiting (bounded) for every
//!    entry of a stage before moving on.
//!
//! Entries registered for a later stage while an earlier one is running are
//! honored. Entries registered for the running stage or an earlier one are
//! silently ignored.
//!
//! The [`global`] module holds the process-wide instance and mirrors the
//! coordinator API as free functions.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! stagewise::global::set_timeout(Duration::from_secs(2));
//!
//! let notifier = stagewise::global::first();
//! std::thread::spawn(move || {
//!     if let Ok(activation) = notifier.recv() {
//!         // flush buffers, close listeners ...
//!         activation.done();
//!     }
//! });
//!
//! stagewise::global::second_func(|name| println!("closing {name}"), "database");
//!
//! stagewise::global::shutdown();
//! assert!(stagewise::global::started());
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod global;
pub mod notifier;
mod panic;
mod registry;
#[cfg(feature = "signals")]
pub mod signal;
pub mod stage;

pub use config::{ConfigError, ShutdownConfig};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use gate::GateGuard;
pub use notifier::{Activation, Notifier};
pub use stage::Stage;
