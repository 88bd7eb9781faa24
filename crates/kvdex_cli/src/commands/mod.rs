//! CLI command implementations.

pub mod destroy;
pub mod dump;
pub mod inspect;

use crate::error::{CliError, CliResult};
use kvdex_store::RedisStore;

/// Output format selected with `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` argument.
    pub fn parse(format: &str) -> CliResult<Self> {
        match format {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::Format(other.to_string())),
        }
    }
}

/// Opens a connection to the server at `url`.
pub fn connect(url: &str) -> CliResult<RedisStore> {
    let store = RedisStore::from_url(url)?;
    tracing::debug!(address = %store.config().address(), "connected");
    Ok(store)
}
