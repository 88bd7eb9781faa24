//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred on the connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection could not be established or was lost.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// A read or write did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The server sent something that is not valid RESP.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the malformed reply.
        message: String,
    },

    /// The server answered with an error reply.
    #[error("server error: {message}")]
    Server {
        /// The error text sent by the server.
        message: String,
    },

    /// A command was issued against a key holding a different shape.
    #[error("wrong type for key {key}: expected {expected}")]
    WrongType {
        /// The offending key.
        key: String,
        /// The shape the command required.
        expected: &'static str,
    },

    /// A stored value could not be interpreted (e.g. `INCR` on text).
    #[error("invalid value at {key}: {message}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// A watched key changed before the atomic unit was submitted.
    #[error("atomic unit aborted: a watched key was modified")]
    Conflict,

    /// The caller abandoned the atomic unit while building it.
    #[error("atomic unit cancelled: {reason}")]
    Cancelled {
        /// Why the unit was abandoned.
        reason: String,
    },

    /// Connection settings are malformed.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a server error, recognising `WRONGTYPE` replies.
    pub fn server(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.starts_with("WRONGTYPE") {
            return Self::WrongType {
                key: String::new(),
                expected: "matching type",
            };
        }
        Self::Server { message }
    }

    /// Creates a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if the error means the connection can no longer be trusted.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection { .. } | Self::Timeout | Self::Protocol { .. }
        )
    }

    /// Maps an I/O error, separating timeouts from other transport failures.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(err),
        }
    }
}
