//! Named fields and index token derivation.

use crate::error::{CodecError, CodecResult};
use crate::field_type::{FieldCodec, FieldType};
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// A named, typed field of a model.
///
/// `Field` is where the unset sentinel is intercepted: unset values are
/// never handed to the [`FieldCodec`] and never produce storage bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    kind: FieldType,
    hash_index: bool,
    default: Option<Value>,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            hash_index: false,
            default: None,
        }
    }

    /// Shorthand for a [`FieldType::Text`] field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    /// Shorthand for a [`FieldType::Integer`] field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Shorthand for a [`FieldType::Link`] field.
    pub fn link(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::Link {
                model: model.into(),
            },
        )
    }

    /// Index this field by the SHA-256 of its stored bytes.
    #[must_use]
    pub fn hashed(mut self) -> Self {
        self.hash_index = true;
        self
    }

    /// Value assigned to new records.
    ///
    /// # Errors
    ///
    /// Returns an error if the default cannot be converted to the field type.
    pub fn with_default(mut self, default: impl Into<Value>) -> CodecResult<Self> {
        let default = self.input(default.into())?;
        self.default = Some(default);
        Ok(self)
    }

    /// The field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field type.
    pub fn kind(&self) -> &FieldType {
        &self.kind
    }

    /// Whether values of this field may be indexed.
    pub fn can_index(&self) -> bool {
        self.kind.can_index()
    }

    /// Whether index tokens are hashed.
    pub fn is_index_hashed(&self) -> bool {
        self.hash_index || self.kind.forces_hashed_index()
    }

    /// The value a freshly created record holds.
    pub fn default_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.kind.missing_value())
    }

    /// Converts caller input.
    ///
    /// The unset sentinel passes through, except on [`FieldType::Classic`]
    /// fields where it becomes the empty string.
    pub fn input(&self, raw: Value) -> CodecResult<Value> {
        if raw.is_unset() {
            return Ok(self.kind.missing_value());
        }
        self.kind
            .from_input(raw)
            .map_err(|e| e.in_field(&self.name))
    }

    /// Encodes a value, returning `None` for the unset sentinel.
    pub fn encode(&self, value: &Value) -> CodecResult<Option<Vec<u8>>> {
        if value.is_unset() {
            return Ok(None);
        }
        self.kind
            .to_storage(value)
            .map(Some)
            .map_err(|e| e.in_field(&self.name))
    }

    /// Decodes stored bytes; a missing field yields the type's missing value.
    pub fn decode(&self, stored: Option<&[u8]>) -> CodecResult<Value> {
        match stored {
            None => Ok(self.kind.missing_value()),
            Some(bytes) => self
                .kind
                .from_storage(bytes)
                .map_err(|e| e.in_field(&self.name)),
        }
    }

    /// Index token for stored bytes, or `None` for an unset value.
    pub fn token_for_stored(&self, stored: Option<&[u8]>) -> Option<String> {
        stored.map(|bytes| index_token(bytes, self.is_index_hashed()))
    }

    /// Index token for an in-memory value, or `None` for an unset value.
    pub fn index_token(&self, value: &Value) -> CodecResult<Option<String>> {
        let stored = self.encode(value)?;
        Ok(self.token_for_stored(stored.as_deref()))
    }

    /// Checks the field declaration on its own.
    pub fn validate(&self) -> CodecResult<()> {
        if let FieldType::FixedPoint { places } = self.kind {
            if places > crate::field_type::MAX_FIXED_POINT_PLACES {
                return Err(CodecError::invalid_field(format!(
                    "field {:?}: at most {} decimal places are supported",
                    self.name,
                    crate::field_type::MAX_FIXED_POINT_PLACES
                )));
            }
        }
        if let Some(model) = self.kind.linked_model() {
            if model.is_empty() {
                return Err(CodecError::invalid_field(format!(
                    "field {:?}: link target model is empty",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Derives the index token for a stored value.
///
/// The token is the stored text itself, or the hex SHA-256 of the stored
/// bytes when `hashed` is set. Bytes that are not UTF-8 are always hashed.
pub fn index_token(stored: &[u8], hashed: bool) -> String {
    match std::str::from_utf8(stored) {
        Ok(text) if !hashed => text.to_string(),
        _ => sha256_hex(stored),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::Compression;

    #[test]
    fn unset_is_never_encoded() {
        let field = Field::text("name");
        assert_eq!(field.encode(&Value::Unset).unwrap(), None);
        assert_eq!(field.decode(None).unwrap(), Value::Unset);
        assert_eq!(field.index_token(&Value::Unset).unwrap(), None);
    }

    #[test]
    fn empty_text_is_not_unset() {
        let field = Field::text("name");
        let empty = Value::Text(String::new());
        assert_eq!(field.encode(&empty).unwrap(), Some(Vec::new()));
        assert_eq!(field.decode(Some(b"")).unwrap(), empty);
        assert_eq!(field.index_token(&empty).unwrap(), Some(String::new()));
    }

    #[test]
    fn classic_reads_missing_as_empty() {
        let field = Field::new("legacy", FieldType::Classic);
        assert_eq!(field.decode(None).unwrap(), Value::Text(String::new()));
        assert_eq!(field.default_value(), Value::Text(String::new()));
        assert_eq!(field.input(Value::Unset).unwrap(), Value::Text(String::new()));
    }

    #[test]
    fn defaults_are_converted() {
        let field = Field::integer("score").with_default("5").unwrap();
        assert_eq!(field.default_value(), Value::Integer(5));
        assert!(Field::integer("score").with_default("x").is_err());
    }

    #[test]
    fn hashed_tokens() {
        let plain = Field::text("title");
        let hashed = Field::text("title").hashed();
        assert_eq!(plain.index_token(&"abc".into()).unwrap().unwrap(), "abc");
        assert_eq!(
            hashed.index_token(&"abc".into()).unwrap().unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let compressed = Field::new("blob", FieldType::Compressed { mode: Compression::Lz4 });
        assert!(compressed.is_index_hashed());
        assert_eq!(index_token(&[0xff, 0xfe], false).len(), 64);
    }

    #[test]
    fn errors_name_the_field() {
        let field = Field::integer("age");
        let err = field.decode(Some(b"old")).unwrap_err();
        assert_eq!(err.field(), Some("age"));
    }

    #[test]
    fn validate_fixed_point_places() {
        assert!(Field::new("p", FieldType::FixedPoint { places: 2 }).validate().is_ok());
        assert!(Field::new("p", FieldType::FixedPoint { places: 40 }).validate().is_err());
        assert!(Field::link("owner", "").validate().is_err());
    }
}
