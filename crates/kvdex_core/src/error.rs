//! Error types for kvdex core.

use kvdex_codec::CodecError;
use kvdex_store::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Classification of every [`CoreError`].
///
/// None of these are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid field, index or model declaration, or misuse of a model.
    Schema,
    /// A stored value could not be decoded, or an input could not be converted.
    Decode,
    /// Unsupported filter shape.
    Filter,
    /// The store rejected or aborted an atomic unit.
    Transaction,
    /// Transport failure.
    Connection,
    /// The store did not answer in time.
    Timeout,
}

/// Errors that can occur in kvdex core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backing store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Field codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid schema declaration.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// The model has no field with this name.
    #[error("model {namespace:?} has no field {field:?}")]
    UnknownField {
        /// Model namespace.
        namespace: String,
        /// Requested field.
        field: String,
    },

    /// No model is registered under this namespace.
    #[error("no model registered under {namespace:?}")]
    UnknownModel {
        /// Requested namespace.
        namespace: String,
    },

    /// A record was handed to a model it does not belong to.
    #[error("record of model {found:?} used with model {expected:?}")]
    ModelMismatch {
        /// Namespace of the model doing the work.
        expected: String,
        /// Namespace of the record.
        found: String,
    },

    /// A link field refers to a record that has never been saved.
    #[error("field {field:?} of model {namespace:?} links to an unsaved record")]
    UnsavedLink {
        /// Model namespace.
        namespace: String,
        /// Link field.
        field: String,
    },

    /// The same stored record appears twice in one save with different values.
    #[error("record {namespace}:{pk} appears twice in one save with different values")]
    DuplicateRecord {
        /// Model namespace.
        namespace: String,
        /// Primary key.
        pk: u64,
    },

    /// Unsupported filter.
    #[error("filter error: {message}")]
    Filter {
        /// Description of the problem.
        message: String,
    },

    /// Persisted bookkeeping is unreadable.
    #[error("corrupt data at {key}: {message}")]
    Corrupt {
        /// Offending key.
        key: String,
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a filter error.
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter {
            message: message.into(),
        }
    }

    /// Creates a corrupt data error.
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(err) => match err {
                StoreError::Timeout => ErrorKind::Timeout,
                StoreError::Io(_)
                | StoreError::Connection { .. }
                | StoreError::Protocol { .. }
                | StoreError::Config { .. } => ErrorKind::Connection,
                StoreError::Server { .. }
                | StoreError::WrongType { .. }
                | StoreError::InvalidValue { .. }
                | StoreError::Conflict
                | StoreError::Cancelled { .. } => ErrorKind::Transaction,
            },
            Self::Codec(_) | Self::Corrupt { .. } => ErrorKind::Decode,
            Self::Schema { .. }
            | Self::UnknownField { .. }
            | Self::UnknownModel { .. }
            | Self::ModelMismatch { .. }
            | Self::UnsavedLink { .. }
            | Self::DuplicateRecord { .. } => ErrorKind::Schema,
            Self::Filter { .. } => ErrorKind::Filter,
        }
    }

    /// Returns true if the store rejected the unit because a watched key changed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict))
    }
}

/// Carries a [`CoreError`] raised inside an atomic-unit builder out of the store.
///
/// Builders can only fail with a [`StoreError`]; core errors are stashed here
/// and the unit is cancelled. [`UnitError::finish`] restores the original error.
#[derive(Debug, Default)]
pub(crate) struct UnitError {
    stashed: Option<CoreError>,
}

impl UnitError {
    /// Stashes a core error and returns the cancellation to hand to the store.
    pub(crate) fn stash(&mut self, err: CoreError) -> StoreError {
        let reason = err.to_string();
        match err {
            CoreError::Store(store_err) => store_err,
            other => {
                self.stashed = Some(other);
                StoreError::cancelled(reason)
            }
        }
    }

    /// Maps the result of `atomic`, preferring a stashed core error.
    pub(crate) fn finish<T>(mut self, result: Result<T, StoreError>) -> CoreResult<T> {
        match (result, self.stashed.take()) {
            (Ok(value), _) => Ok(value),
            (Err(StoreError::Cancelled { .. }), Some(stashed)) => Err(stashed),
            (Err(err), _) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn store_errors_are_classified() {
        assert_eq!(CoreError::from(StoreError::Timeout).kind(), ErrorKind::Timeout);
        assert_eq!(CoreError::from(StoreError::Conflict).kind(), ErrorKind::Transaction);
        assert_eq!(
            CoreError::from(StoreError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "x"))).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            CoreError::from(StoreError::server("ERR boom")).kind(),
            ErrorKind::Transaction
        );
        assert!(CoreError::from(StoreError::Conflict).is_conflict());
    }

    #[test]
    fn core_errors_are_classified() {
        assert_eq!(CoreError::schema("x").kind(), ErrorKind::Schema);
        assert_eq!(CoreError::filter("x").kind(), ErrorKind::Filter);
        assert_eq!(
            CoreError::from(CodecError::malformed("integer", "x")).kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            CoreError::UnsavedLink {
                namespace: "a".into(),
                field: "b".into()
            }
            .kind(),
            ErrorKind::Schema
        );
    }

    #[test]
    fn unit_error_round_trips_core_errors() {
        let mut unit = UnitError::default();
        let cancelled = unit.stash(CoreError::filter("nope"));
        let result: CoreResult<()> = unit.finish(Err(cancelled));
        assert!(matches!(result, Err(CoreError::Filter { .. })));

        let mut unit = UnitError::default();
        let passthrough = unit.stash(CoreError::Store(StoreError::Timeout));
        let result: CoreResult<()> = unit.finish(Err(passthrough));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }
}
