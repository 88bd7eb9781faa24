//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting field values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// An input value cannot be converted to the field's type.
    #[error("cannot convert {found} input to {expected}: {message}")]
    InvalidInput {
        /// Field type that was expected.
        expected: &'static str,
        /// Kind of value that was supplied.
        found: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// A stored representation is corrupt.
    #[error("malformed stored {expected} value: {message}")]
    Malformed {
        /// Field type being decoded.
        expected: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// The unset sentinel reached a conversion that cannot represent it.
    #[error("the unset value has no storage representation")]
    UnsetValue,

    /// A field declaration is unusable.
    #[error("invalid field declaration: {message}")]
    InvalidField {
        /// Description of the problem.
        message: String,
    },

    /// Context wrapper naming the field being converted.
    #[error("field {field:?}: {source}")]
    InField {
        /// Field name.
        field: String,
        /// Underlying error.
        #[source]
        source: Box<CodecError>,
    },
}

impl CodecError {
    /// Creates an invalid input error.
    pub fn invalid_input(
        expected: &'static str,
        found: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            expected,
            found,
            message: message.into(),
        }
    }

    /// Creates a malformed storage error.
    pub fn malformed(expected: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            expected,
            message: message.into(),
        }
    }

    /// Creates an invalid field declaration error.
    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self::InvalidField {
            message: message.into(),
        }
    }

    /// Wraps the error with the name of the field it occurred on.
    #[must_use]
    pub fn in_field(self, field: &str) -> Self {
        match self {
            already @ Self::InField { .. } => already,
            other => Self::InField {
                field: field.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the error without any field context.
    pub fn root(&self) -> &CodecError {
        match self {
            Self::InField { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the field name, if the error carries one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InField { field, .. } => Some(field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_context_wraps_once() {
        let err = CodecError::malformed("integer", "not a number")
            .in_field("age")
            .in_field("other");
        assert_eq!(err.field(), Some("age"));
        assert!(matches!(err.root(), CodecError::Malformed { .. }));
        assert_eq!(
            err.to_string(),
            "field \"age\": malformed stored integer value: not a number"
        );
    }
}
