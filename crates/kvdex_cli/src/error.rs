//! CLI error type.

use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] kvdex_store::StoreError),

    /// Invalid namespace or unreadable bookkeeping.
    #[error(transparent)]
    Core(#[from] kvdex_core::CoreError),

    /// Output could not be rendered.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// Unsupported `--format`.
    #[error("unknown output format {0:?} (expected text or json)")]
    Format(String),

    /// A destructive command was declined.
    #[error("aborted")]
    Aborted,

    /// Terminal I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type of CLI commands.
pub type CliResult<T> = Result<T, CliError>;
