//! # kvdex Codec
//!
//! Field codecs for kvdex.
//!
//! Every field of a model has a [`FieldType`] from a closed set. Each type
//! implements the [`FieldCodec`] capability:
//!
//! - `from_input` - caller value to in-memory value
//! - `from_storage` - stored bytes to in-memory value
//! - `to_storage` - in-memory value to stored bytes
//!
//! ## The unset sentinel
//!
//! [`Value::Unset`] marks a field that was never assigned. It equals only
//! itself, has no stored representation (the field is simply absent from
//! the record) and indexes into a bucket family of its own, so it never
//! collides with the empty string. [`FieldType::Classic`] reads a missing
//! field back as the empty string instead.
//!
//! ## Usage
//!
//! ```
//! use kvdex_codec::{Field, FieldType, Value};
//!
//! let field = Field::new("score", FieldType::Integer);
//! let value = field.input("42".into()).unwrap();
//! let stored = field.encode(&value).unwrap().unwrap();
//! assert_eq!(stored, b"42");
//! assert_eq!(field.decode(Some(&stored)).unwrap(), Value::Integer(42));
//! assert_eq!(field.decode(None).unwrap(), Value::Unset);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod field;
mod field_type;
mod value;

pub use error::{CodecError, CodecResult};
pub use field::{index_token, Field};
pub use field_type::{Compression, FieldCodec, FieldType, MAX_FIXED_POINT_PLACES};
pub use value::Value;
