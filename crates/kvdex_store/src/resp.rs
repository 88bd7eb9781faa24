//! RESP2 wire codec.
//!
//! Commands are always sent as arrays of bulk strings. Replies are read
//! frame by frame from any buffered reader, which keeps the codec testable
//! over plain byte slices.

use crate::error::{StoreError, StoreResult};
use std::io::{BufRead, Read, Write};

/// Maximum accepted bulk string length.
/// Matches the server's own `proto-max-bulk-len` default.
const MAX_BULK_LENGTH: i64 = 512 * 1024 * 1024;

/// Maximum accepted array length.
const MAX_ARRAY_ELEMENTS: i64 = 16 * 1024 * 1024;

/// Maximum nesting depth of array replies.
const MAX_DEPTH: usize = 32;

/// A decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK`
    Simple(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`, or `$-1` for nil.
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...`, or `*-1` for nil.
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Turns an error reply into a [`StoreError`], passing anything else through.
    pub fn into_result(self) -> StoreResult<Frame> {
        match self {
            Frame::Error(message) => Err(StoreError::server(message)),
            other => Ok(other),
        }
    }

    /// Expects a `+OK`-style status reply.
    pub fn expect_ok(self) -> StoreResult<()> {
        match self.into_result()? {
            Frame::Simple(_) => Ok(()),
            other => Err(unexpected("status", &other)),
        }
    }

    /// Expects an integer reply.
    pub fn into_integer(self) -> StoreResult<i64> {
        match self.into_result()? {
            Frame::Integer(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Expects a bulk string reply, which may be nil.
    pub fn into_bulk(self) -> StoreResult<Option<Vec<u8>>> {
        match self.into_result()? {
            Frame::Bulk(bytes) => Ok(bytes),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    /// Expects an array reply, which may be nil.
    pub fn into_array(self) -> StoreResult<Option<Vec<Frame>>> {
        match self.into_result()? {
            Frame::Array(items) => Ok(items),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Expects an array of non-nil bulk strings and decodes them as UTF-8.
    pub fn into_strings(self) -> StoreResult<Vec<String>> {
        self.into_array()?
            .unwrap_or_default()
            .into_iter()
            .map(|item| {
                let bytes = item
                    .into_bulk()?
                    .ok_or_else(|| StoreError::protocol("nil element in string array"))?;
                String::from_utf8(bytes)
                    .map_err(|_| StoreError::protocol("non UTF-8 string in reply"))
            })
            .collect()
    }
}

fn unexpected(wanted: &str, got: &Frame) -> StoreError {
    let kind = match got {
        Frame::Simple(_) => "status",
        Frame::Error(_) => "error",
        Frame::Integer(_) => "integer",
        Frame::Bulk(_) => "bulk string",
        Frame::Array(_) => "array",
    };
    StoreError::protocol(format!("expected {wanted} reply, got {kind}"))
}

/// Encodes one command as an array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Writes an already encoded buffer and flushes it.
pub fn write_all<W: Write>(writer: &mut W, buf: &[u8]) -> StoreResult<()> {
    writer.write_all(buf).map_err(StoreError::from_io)?;
    writer.flush().map_err(StoreError::from_io)
}

/// Reads RESP2 frames from a buffered source.
pub struct FrameReader<R> {
    inner: R,
    line: Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
    /// Wraps a buffered reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(64),
        }
    }

    /// Returns the wrapped reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Reads the next complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the stream ends, or
    /// [`StoreError::Protocol`] if the bytes are not valid RESP2.
    pub fn read_frame(&mut self) -> StoreResult<Frame> {
        self.read_nested(0)
    }

    fn read_nested(&mut self, depth: usize) -> StoreResult<Frame> {
        if depth > MAX_DEPTH {
            return Err(StoreError::protocol("reply nested too deeply"));
        }
        self.read_line()?;
        let (&marker, rest) = self
            .line
            .split_first()
            .ok_or_else(|| StoreError::protocol("empty reply line"))?;
        let text = std::str::from_utf8(rest)
            .map_err(|_| StoreError::protocol("non UTF-8 reply header"))?
            .to_string();

        match marker {
            b'+' => Ok(Frame::Simple(text)),
            b'-' => Ok(Frame::Error(text)),
            b':' => parse_int(&text).map(Frame::Integer),
            b'$' => {
                let len = parse_int(&text)?;
                if len < 0 {
                    return Ok(Frame::Bulk(None));
                }
                if len > MAX_BULK_LENGTH {
                    return Err(StoreError::protocol(format!("bulk length {len} too large")));
                }
                let mut body = vec![0u8; len as usize + 2];
                self.inner.read_exact(&mut body).map_err(|err| {
                    if err.kind() == std::io::ErrorKind::UnexpectedEof {
                        StoreError::connection("connection closed mid-reply")
                    } else {
                        StoreError::from_io(err)
                    }
                })?;
                if !body.ends_with(b"\r\n") {
                    return Err(StoreError::protocol("bulk string not terminated by CRLF"));
                }
                body.truncate(len as usize);
                Ok(Frame::Bulk(Some(body)))
            }
            b'*' => {
                let len = parse_int(&text)?;
                if len < 0 {
                    return Ok(Frame::Array(None));
                }
                if len > MAX_ARRAY_ELEMENTS {
                    return Err(StoreError::protocol(format!("array length {len} too large")));
                }
                let mut items = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    items.push(self.read_nested(depth + 1)?);
                }
                Ok(Frame::Array(Some(items)))
            }
            other => Err(StoreError::protocol(format!(
                "unknown reply marker {:?}",
                other as char
            ))),
        }
    }

    fn read_line(&mut self) -> StoreResult<()> {
        self.line.clear();
        let read = self
            .inner
            .read_until(b'\n', &mut self.line)
            .map_err(StoreError::from_io)?;
        if read == 0 {
            return Err(StoreError::connection("connection closed by server"));
        }
        if !self.line.ends_with(b"\r\n") {
            return Err(StoreError::protocol("reply line not terminated by CRLF"));
        }
        self.line.truncate(self.line.len() - 2);
        Ok(())
    }
}

fn parse_int(text: &str) -> StoreResult<i64> {
    text.parse::<i64>()
        .map_err(|_| StoreError::protocol(format!("invalid integer {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(bytes: &[u8]) -> StoreResult<Frame> {
        FrameReader::new(Cursor::new(bytes.to_vec())).read_frame()
    }

    #[test]
    fn encode_command_uses_bulk_strings() {
        let mut out = Vec::new();
        encode_command(&["SADD", "users:keys", "7"], &mut out);
        assert_eq!(out, b"*3\r\n$4\r\nSADD\r\n$10\r\nusers:keys\r\n$1\r\n7\r\n");
    }

    #[test]
    fn encode_binary_argument() {
        let mut out = Vec::new();
        let args: [&[u8]; 2] = [b"SET", b"a\r\nb"];
        encode_command(&args, &mut out);
        assert_eq!(out, b"*2\r\n$3\r\nSET\r\n$4\r\na\r\nb\r\n");
    }

    #[test]
    fn read_scalars() {
        assert_eq!(read(b"+OK\r\n").unwrap(), Frame::Simple("OK".into()));
        assert_eq!(read(b":-12\r\n").unwrap(), Frame::Integer(-12));
        assert_eq!(read(b"$-1\r\n").unwrap(), Frame::Bulk(None));
        assert_eq!(
            read(b"$5\r\nhe\r\no\r\n").unwrap(),
            Frame::Bulk(Some(b"he\r\no".to_vec()))
        );
        assert_eq!(read(b"$0\r\n\r\n").unwrap(), Frame::Bulk(Some(Vec::new())));
    }

    #[test]
    fn read_nested_array() {
        let frame = read(b"*2\r\n$1\r\n0\r\n*2\r\n$3\r\na:1\r\n$3\r\na:2\r\n").unwrap();
        let items = frame.into_array().unwrap().unwrap();
        assert_eq!(items[0], Frame::Bulk(Some(b"0".to_vec())));
        assert_eq!(
            items[1].clone().into_strings().unwrap(),
            vec!["a:1".to_string(), "a:2".to_string()]
        );
    }

    #[test]
    fn nil_array_is_distinct_from_empty() {
        assert_eq!(read(b"*-1\r\n").unwrap(), Frame::Array(None));
        assert_eq!(read(b"*0\r\n").unwrap(), Frame::Array(Some(Vec::new())));
    }

    #[test]
    fn error_reply_becomes_server_error() {
        let frame = read(b"-ERR unknown command\r\n").unwrap();
        assert!(matches!(
            frame.into_integer(),
            Err(StoreError::Server { message }) if message == "ERR unknown command"
        ));
    }

    #[test]
    fn truncated_input_is_connection_error() {
        assert!(matches!(read(b""), Err(StoreError::Connection { .. })));
        assert!(matches!(
            read(b"$10\r\nabc"),
            Err(StoreError::Connection { .. })
        ));
    }

    #[test]
    fn malformed_input_is_protocol_error() {
        assert!(matches!(read(b"?what\r\n"), Err(StoreError::Protocol { .. })));
        assert!(matches!(read(b":abc\r\n"), Err(StoreError::Protocol { .. })));
        assert!(matches!(read(b"+OK\n"), Err(StoreError::Protocol { .. })));
        assert!(matches!(
            read(b"$3\r\nabcXY"),
            Err(StoreError::Protocol { .. })
        ));
    }

    #[test]
    fn unexpected_shape_is_protocol_error() {
        let frame = Frame::Integer(1);
        assert!(matches!(frame.into_bulk(), Err(StoreError::Protocol { .. })));
    }

    #[test]
    fn reads_consecutive_frames() {
        let mut reader = FrameReader::new(Cursor::new(b"+QUEUED\r\n:1\r\n".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Frame::Simple("QUEUED".into()));
        assert_eq!(reader.read_frame().unwrap(), Frame::Integer(1));
    }
}
