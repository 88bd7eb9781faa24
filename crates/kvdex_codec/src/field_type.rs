//! The closed set of field types and their conversions.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::io::{Read, Write};

/// Largest supported number of decimal places for [`FieldType::FixedPoint`].
pub const MAX_FIXED_POINT_PLACES: u8 = 12;

/// zstd level used by compressed fields. Fixed so equal inputs compress
/// to equal bytes, which keeps hashed indexes stable.
const ZSTD_LEVEL: i32 = 3;

/// zlib and bzip2 level used by compressed fields. Level 9 gives the fixed
/// headers `x\xda` and `BZh9` that mark a stored value as compressed.
const DEFLATE_LEVEL: u32 = 9;

/// Upper bound on a decompressed value.
const MAX_DECOMPRESSED_LEN: u32 = 512 * 1024 * 1024;

/// Conversion capability shared by every field type.
///
/// The unset sentinel is handled by [`crate::Field`] before these methods are
/// reached; implementations only see assigned values.
pub trait FieldCodec {
    /// Converts a caller-supplied value into the field's in-memory form.
    fn from_input(&self, raw: Value) -> CodecResult<Value>;

    /// Decodes a stored representation.
    fn from_storage(&self, stored: &[u8]) -> CodecResult<Value>;

    /// Encodes an in-memory value for storage.
    fn to_storage(&self, value: &Value) -> CodecResult<Vec<u8>>;
}

/// Compression algorithm of a [`FieldType::Compressed`] field.
///
/// `Zlib` and `Bz2` read and write the same bytes as the Python
/// IndexedRedis compressed field, so existing datasets stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// zlib streams at level 9.
    Zlib,
    /// bzip2 streams at level 9.
    Bz2,
    /// zstd frames.
    Zstd,
    /// LZ4 blocks prefixed with the uncompressed size.
    Lz4,
}

impl Compression {
    /// Parses a mode name, accepting the usual aliases (`gzip`, `bzip2`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "zlib" | "gzip" | "gz" => Some(Self::Zlib),
            "bz2" | "bzip2" => Some(Self::Bz2),
            "zstd" => Some(Self::Zstd),
            "lz4" => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Leading bytes of every value this mode writes, when fixed.
    pub fn header(self) -> Option<&'static [u8]> {
        match self {
            Self::Zlib => Some(b"x\xda"),
            Self::Bz2 => Some(b"BZh9"),
            Self::Zstd | Self::Lz4 => None,
        }
    }
}

/// The type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// UTF-8 text, unset by default.
    Text,
    /// UTF-8 text that reads back as the empty string when never assigned.
    Classic,
    /// Signed 64-bit integer.
    Integer,
    /// Finite float. Not indexable.
    Float,
    /// Boolean stored as `1` / `0`.
    Bool,
    /// Raw bytes. Not indexable.
    Bytes,
    /// Bytes stored as base64 text.
    Base64,
    /// Decimal rounded to a fixed number of places.
    FixedPoint {
        /// Number of decimal places kept.
        places: u8,
    },
    /// JSON document.
    Json,
    /// UTC instant stored as RFC 3339.
    Datetime,
    /// Compressed bytes. Indexable, always hashed.
    Compressed {
        /// Compression algorithm.
        mode: Compression,
    },
    /// Link to one record of another model.
    Link {
        /// Namespace of the linked model.
        model: String,
    },
    /// Links to several records of another model. Not indexable.
    MultiLink {
        /// Namespace of the linked model.
        model: String,
    },
}

impl FieldType {
    /// Short name of the type, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Classic => "classic",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Bytes => "bytes",
            FieldType::Base64 => "base64",
            FieldType::FixedPoint { .. } => "fixed-point",
            FieldType::Json => "json",
            FieldType::Datetime => "datetime",
            FieldType::Compressed { .. } => "compressed",
            FieldType::Link { .. } => "link",
            FieldType::MultiLink { .. } => "multi-link",
        }
    }

    /// Checks whether values of this type may be indexed.
    pub fn can_index(&self) -> bool {
        !matches!(
            self,
            FieldType::Float | FieldType::Bytes | FieldType::MultiLink { .. }
        )
    }

    /// Checks whether this type always hashes its index tokens.
    pub fn forces_hashed_index(&self) -> bool {
        matches!(self, FieldType::Compressed { .. })
    }

    /// Namespace of the linked model, for link types.
    pub fn linked_model(&self) -> Option<&str> {
        match self {
            FieldType::Link { model } | FieldType::MultiLink { model } => Some(model),
            _ => None,
        }
    }

    /// The value a record holds when the field is missing from storage.
    pub fn missing_value(&self) -> Value {
        match self {
            FieldType::Classic => Value::Text(String::new()),
            _ => Value::Unset,
        }
    }

    fn bad_input(&self, raw: &Value, message: impl Into<String>) -> CodecError {
        CodecError::invalid_input(self.name(), raw.kind_name(), message)
    }

    fn bad_storage(&self, message: impl Into<String>) -> CodecError {
        CodecError::malformed(self.name(), message)
    }

    fn stored_text<'a>(&self, stored: &'a [u8]) -> CodecResult<&'a str> {
        std::str::from_utf8(stored).map_err(|_| self.bad_storage("not valid UTF-8"))
    }
}

impl FieldCodec for FieldType {
    fn from_input(&self, raw: Value) -> CodecResult<Value> {
        if raw.is_unset() {
            return Ok(raw);
        }
        match self {
            FieldType::Text | FieldType::Classic => match raw {
                Value::Text(_) => Ok(raw),
                Value::Integer(n) => Ok(Value::Text(n.to_string())),
                Value::Float(x) => Ok(Value::Text(x.to_string())),
                Value::Bool(b) => Ok(Value::Text(if b { "1" } else { "0" }.to_string())),
                Value::Bytes(bytes) => String::from_utf8(bytes)
                    .map(Value::Text)
                    .map_err(|_| CodecError::invalid_input(self.name(), "bytes", "not valid UTF-8")),
                other => Err(self.bad_input(&other, "expected text")),
            },
            FieldType::Integer => match raw {
                Value::Integer(_) => Ok(raw),
                Value::Bool(b) => Ok(Value::Integer(i64::from(b))),
                Value::Text(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| self.bad_input(&raw, e.to_string())),
                other => Err(self.bad_input(&other, "expected an integer")),
            },
            FieldType::Float => {
                let x = match raw {
                    Value::Float(x) => x,
                    Value::Integer(n) => n as f64,
                    Value::Text(ref s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|e| self.bad_input(&raw, e.to_string()))?,
                    other => return Err(self.bad_input(&other, "expected a number")),
                };
                if !x.is_finite() {
                    return Err(CodecError::invalid_input(self.name(), "float", "not finite"));
                }
                Ok(Value::Float(x))
            }
            FieldType::Bool => match raw {
                Value::Bool(_) => Ok(raw),
                Value::Integer(0) => Ok(Value::Bool(false)),
                Value::Integer(1) => Ok(Value::Bool(true)),
                Value::Text(ref s) => parse_bool(s)
                    .map(Value::Bool)
                    .ok_or_else(|| self.bad_input(&raw, format!("unexpected value {s:?}"))),
                other => Err(self.bad_input(&other, "expected a boolean")),
            },
            FieldType::Bytes | FieldType::Base64 | FieldType::Compressed { .. } => match raw {
                Value::Bytes(_) => Ok(raw),
                Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
                other => Err(self.bad_input(&other, "expected bytes")),
            },
            FieldType::FixedPoint { places } => {
                let x = match raw {
                    Value::Float(x) => x,
                    Value::Integer(n) => n as f64,
                    Value::Text(ref s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|e| self.bad_input(&raw, e.to_string()))?,
                    other => return Err(self.bad_input(&other, "expected a number")),
                };
                if !x.is_finite() {
                    return Err(CodecError::invalid_input(self.name(), "float", "not finite"));
                }
                Ok(Value::Float(round_to(x, *places)))
            }
            FieldType::Json => match raw {
                Value::Json(_) => Ok(raw),
                Value::Text(s) => Ok(Value::Json(serde_json::Value::String(s))),
                Value::Integer(n) => Ok(Value::Json(serde_json::Value::from(n))),
                Value::Bool(b) => Ok(Value::Json(serde_json::Value::Bool(b))),
                Value::Float(x) => serde_json::Number::from_f64(x)
                    .map(|n| Value::Json(serde_json::Value::Number(n)))
                    .ok_or_else(|| CodecError::invalid_input(self.name(), "float", "not finite")),
                other => Err(self.bad_input(&other, "expected a JSON document")),
            },
            FieldType::Datetime => match raw {
                Value::Datetime(_) => Ok(raw),
                Value::Text(ref s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| Value::Datetime(dt.with_timezone(&Utc)))
                    .map_err(|e| self.bad_input(&raw, e.to_string())),
                Value::Integer(secs) => Utc
                    .timestamp_opt(secs, 0)
                    .single()
                    .map(Value::Datetime)
                    .ok_or_else(|| self.bad_input(&raw, "timestamp out of range")),
                other => Err(self.bad_input(&other, "expected a datetime")),
            },
            FieldType::Link { .. } => match raw {
                Value::Link(pk) if pk > 0 => Ok(raw),
                Value::Integer(n) if n > 0 => Ok(Value::Link(n as u64)),
                Value::Text(ref s) => parse_pk(s)
                    .map(Value::Link)
                    .ok_or_else(|| self.bad_input(&raw, "expected a positive primary key")),
                other => Err(self.bad_input(&other, "expected a positive primary key")),
            },
            FieldType::MultiLink { .. } => match raw {
                Value::Links(ref pks) if pks.iter().all(|pk| *pk > 0) => Ok(raw),
                Value::Link(pk) if pk > 0 => Ok(Value::Links(vec![pk])),
                Value::Integer(n) if n > 0 => Ok(Value::Links(vec![n as u64])),
                other => Err(self.bad_input(&other, "expected positive primary keys")),
            },
        }
    }

    fn from_storage(&self, stored: &[u8]) -> CodecResult<Value> {
        match self {
            FieldType::Text | FieldType::Classic => {
                Ok(Value::Text(self.stored_text(stored)?.to_string()))
            }
            FieldType::Integer => {
                let text = self.stored_text(stored)?;
                text.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| self.bad_storage(format!("{text:?}: {e}")))
            }
            FieldType::Float | FieldType::FixedPoint { .. } => {
                let text = self.stored_text(stored)?;
                match text.parse::<f64>() {
                    Ok(x) if x.is_finite() => Ok(Value::Float(x)),
                    Ok(_) => Err(self.bad_storage(format!("{text:?} is not finite"))),
                    Err(e) => Err(self.bad_storage(format!("{text:?}: {e}"))),
                }
            }
            FieldType::Bool => match stored {
                b"1" => Ok(Value::Bool(true)),
                b"0" => Ok(Value::Bool(false)),
                other => parse_bool(self.stored_text(other)?)
                    .map(Value::Bool)
                    .ok_or_else(|| self.bad_storage("expected 1 or 0")),
            },
            FieldType::Bytes => Ok(Value::Bytes(stored.to_vec())),
            FieldType::Base64 => BASE64
                .decode(stored)
                .map(Value::Bytes)
                .map_err(|e| self.bad_storage(e.to_string())),
            FieldType::Json => serde_json::from_slice(stored)
                .map(Value::Json)
                .map_err(|e| self.bad_storage(e.to_string())),
            FieldType::Datetime => {
                let text = self.stored_text(stored)?;
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| Value::Datetime(dt.with_timezone(&Utc)))
                    .map_err(|e| self.bad_storage(format!("{text:?}: {e}")))
            }
            FieldType::Compressed { mode } => decompress(*mode, stored)
                .map(Value::Bytes)
                .map_err(|message| self.bad_storage(message)),
            FieldType::Link { .. } => {
                let text = self.stored_text(stored)?;
                parse_pk(text)
                    .map(Value::Link)
                    .ok_or_else(|| self.bad_storage(format!("{text:?} is not a primary key")))
            }
            FieldType::MultiLink { .. } => {
                let text = self.stored_text(stored)?;
                if text.is_empty() {
                    return Ok(Value::Links(Vec::new()));
                }
                text.split(',')
                    .map(|part| {
                        parse_pk(part).ok_or_else(|| {
                            self.bad_storage(format!("{part:?} is not a primary key"))
                        })
                    })
                    .collect::<CodecResult<Vec<u64>>>()
                    .map(Value::Links)
            }
        }
    }

    fn to_storage(&self, value: &Value) -> CodecResult<Vec<u8>> {
        match (self, value) {
            (_, Value::Unset) => Err(CodecError::UnsetValue),
            (FieldType::Text | FieldType::Classic, Value::Text(s)) => Ok(s.clone().into_bytes()),
            (FieldType::Integer, Value::Integer(n)) => Ok(n.to_string().into_bytes()),
            (FieldType::Float, Value::Float(x)) => Ok(x.to_string().into_bytes()),
            (FieldType::FixedPoint { places }, Value::Float(x)) => {
                Ok(format!("{:.*}", usize::from(*places), x).into_bytes())
            }
            (FieldType::Bool, Value::Bool(b)) => Ok(if *b { b"1".to_vec() } else { b"0".to_vec() }),
            (FieldType::Bytes, Value::Bytes(bytes)) => Ok(bytes.clone()),
            (FieldType::Base64, Value::Bytes(bytes)) => Ok(BASE64.encode(bytes).into_bytes()),
            (FieldType::Json, Value::Json(doc)) => serde_json::to_vec(doc)
                .map_err(|e| CodecError::invalid_input(self.name(), "json", e.to_string())),
            (FieldType::Datetime, Value::Datetime(dt)) => {
                Ok(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true).into_bytes())
            }
            (FieldType::Compressed { mode }, Value::Bytes(bytes)) => compress(*mode, bytes)
                .map_err(|message| CodecError::invalid_input(self.name(), "bytes", message)),
            (FieldType::Link { .. }, Value::Link(pk)) => Ok(pk.to_string().into_bytes()),
            (FieldType::MultiLink { .. }, Value::Links(pks)) => {
                let parts: Vec<String> = pks.iter().map(u64::to_string).collect();
                Ok(parts.join(",").into_bytes())
            }
            (_, other) => Err(self.bad_input(other, "value does not match the field type")),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn parse_pk(text: &str) -> Option<u64> {
    text.trim().parse::<u64>().ok().filter(|pk| *pk > 0)
}

fn round_to(x: f64, places: u8) -> f64 {
    let scale = 10f64.powi(i32::from(places));
    (x * scale).round() / scale
}

fn compress(mode: Compression, data: &[u8]) -> Result<Vec<u8>, String> {
    match mode {
        Compression::Zlib => {
            let mut encoder = flate2::write::ZlibEncoder::new(
                Vec::new(),
                flate2::Compression::new(DEFLATE_LEVEL),
            );
            encoder.write_all(data).map_err(|e| e.to_string())?;
            encoder.finish().map_err(|e| e.to_string())
        }
        Compression::Bz2 => {
            let mut encoder = bzip2::write::BzEncoder::new(
                Vec::new(),
                bzip2::Compression::new(DEFLATE_LEVEL),
            );
            encoder.write_all(data).map_err(|e| e.to_string())?;
            encoder.finish().map_err(|e| e.to_string())
        }
        Compression::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL).map_err(|e| e.to_string()),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

fn decompress(mode: Compression, data: &[u8]) -> Result<Vec<u8>, String> {
    // Values written before compression was enabled lack the header.
    if let Some(header) = mode.header() {
        if !data.starts_with(header) {
            return Ok(data.to_vec());
        }
    }
    match mode {
        Compression::Zlib => read_bounded(flate2::read::ZlibDecoder::new(data)),
        Compression::Bz2 => read_bounded(bzip2::read::BzDecoder::new(data)),
        Compression::Zstd => zstd::stream::decode_all(data).map_err(|e| e.to_string()),
        Compression::Lz4 => {
            let declared = data
                .get(..4)
                .map(|prefix| u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]))
                .ok_or_else(|| "missing size prefix".to_string())?;
            if declared > MAX_DECOMPRESSED_LEN {
                return Err(format!("declared size {declared} too large"));
            }
            lz4_flex::decompress_size_prepended(data).map_err(|e| e.to_string())
        }
    }
}

fn read_bounded(decoder: impl Read) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    decoder
        .take(u64::from(MAX_DECOMPRESSED_LEN) + 1)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() > MAX_DECOMPRESSED_LEN as usize {
        return Err(format!("decompressed size exceeds {MAX_DECOMPRESSED_LEN}"));
    }
    Ok(out)
}
