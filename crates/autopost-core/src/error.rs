//! Error types shared across the Autopost crates.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AutopostError>;

/// All errors the Autopost crates can produce.
#[derive(Debug, Error)]
pub enum AutopostError {
    /// Task store I/O or SQL failure. Callers on the hot path retry these
    /// with backoff instead of dropping the state update.
    #[error("store error: {0}")]
    Store(String),

    /// The requested task id does not exist (or no longer exists).
    #[error("task not found: {0}")]
    NotFound(String),

    /// Transport/channel failure outside the classified send outcomes.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
