//! RESP value model and wire encoding.
//!
//! Every frame starts with a one-byte type tag and ends with CRLF:
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR key is not valid\r\n`
//! - `:` Integer: `:42\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`
//! - `*` Array: `*2\r\n$3\r\nGET\r\n$1\r\nk\r\n`
//!
//! `Null` goes out as the null bulk string `$-1\r\n`. The decoder reads that
//! form back as an empty bulk string, so a Null does not survive a round trip.

use bytes::Bytes;
use std::fmt;

/// Line terminator for every RESP frame.
pub const CRLF: &[u8] = b"\r\n";

/// Prefix written in front of every error message.
pub const ERROR_PREFIX: &str = "ERR ";

/// Type tags.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';

    /// Tags introduced by RESP3. Recognised only so they can be rejected
    /// with a clearer message than "unsupported".
    pub const RESP3: &[u8] = b"_,#!=(%~|>";
}

/// A single protocol value, as decoded from a client or sent as a reply.
///
/// Stored values are `RespValue`s as well: SET keeps whatever frame the client
/// sent in the value position and GET hands it back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Single line. Any CR or LF is written as a space.
    SimpleString(String),

    /// Error message without the `ERR ` prefix; the encoder adds it.
    Error(String),

    /// Signed 64-bit integer.
    Integer(i64),

    /// Binary-safe string.
    BulkString(Bytes),

    /// Absent value. Encoded exactly like a null bulk string.
    Null,

    /// Ordered elements of any type, nested arrays included.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a simple string reply such as `+OK`.
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use tidekv::protocol::RespValue;
    /// let err = RespValue::error("key is not valid");
    /// assert_eq!(err.serialize(), b"-ERR key is not valid\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates an integer reply.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a bulk string.
    ///
    /// # Example
    /// ```
    /// use tidekv::protocol::RespValue;
    /// let bulk = RespValue::bulk_string("hello");
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// The absent value, sent as `$-1\r\n`.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array from already-built elements.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Encodes the value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the value into an existing buffer, appending to it.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                extend_line(buf, s);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(msg) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(ERROR_PREFIX.as_bytes());
                extend_line(buf, msg);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Whether this value can be handed back to a client as the result of a
    /// successful read.
    ///
    /// An `Error` anywhere inside the value would be read by the client as a
    /// failure of the command itself, so such values are refused.
    pub fn is_replyable(&self) -> bool {
        match self {
            RespValue::Error(_) => false,
            RespValue::Array(values) => values.iter().all(RespValue::is_replyable),
            _ => true,
        }
    }

    /// Returns true for [`RespValue::Null`] only. A decoded `$-1` is an
    /// empty bulk string and does not count.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns true if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Text of a SimpleString, or of a BulkString holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Raw payload of a BulkString.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Value of an Integer. Bulk strings are not parsed.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes self and returns the elements if this is an Array.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Appends `text` as the body of a single-line frame. CR and LF become
/// spaces so the frame cannot end early.
fn extend_line(buf: &mut Vec<u8>, text: &str) {
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) ERR {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, value)?;
                }
                Ok(())
            }
        }
    }
}
