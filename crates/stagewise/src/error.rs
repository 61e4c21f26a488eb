//! Error types for stagewise.

use crate::config::ConfigError;
use thiserror::Error;

/// The main error type for stagewise operations.
///
/// Shutdown itself never fails: timeouts and handler panics are logged and
/// absorbed. Errors only come from admission, configuration and signal setup.
#[derive(Error, Debug)]
pub enum Error {
    /// Protected work was refused because shutdown has already started.
    #[error("shutdown has already started")]
    ShutdownStarted,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Installing an OS signal handler failed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type alias using stagewise's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
