//! Incremental RESP decoder.
//!
//! The parser works on whatever bytes have arrived so far and returns one of:
//! - `Ok(Some((value, consumed)))`: a full frame was decoded from the first `consumed` bytes
//! - `Ok(None)`: the frame is incomplete, read more and call again
//! - `Err(ParseError)`: the bytes are not valid RESP and the stream cannot be trusted
//!
//! The caller owns the buffer and advances it by `consumed` after each frame,
//! so pipelined frames are handled by calling `parse` in a loop.

use crate::protocol::types::{prefix, RespValue, CRLF, ERROR_PREFIX};
use bytes::Bytes;
use thiserror::Error;

/// Errors produced while decoding a frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("parse array length failed: {0}")]
    ArrayLength(String),

    #[error("parse bulk string length failed: {0}")]
    BulkLength(String),

    #[error("parse integer failed: {0}")]
    Integer(String),

    /// Bulk length below -1.
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("unsupported RESP type: {0:?}")]
    UnsupportedType(char),

    #[error("RESP3 type not supported yet: {0:?}")]
    Resp3NotSupported(char),

    #[error("expected CRLF after bulk string data")]
    MissingCrlf,

    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest accepted bulk string (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest accepted array nesting.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateless apart from the nesting counter, which is reset on every call.
///
/// # Example
///
/// ```
/// use tidekv::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// let (value, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(consumed, 20);
/// assert_eq!(
///     value,
///     RespValue::array(vec![RespValue::bulk_string("GET"), RespValue::bulk_string("k")])
/// );
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    /// Creates a parser. It holds no buffered input, so one parser can be
    /// reused for every frame on a connection.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_simple_string(buf),
            prefix::ERROR => self.parse_error(buf),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            tag if prefix::RESP3.contains(&tag) => {
                Err(ParseError::Resp3NotSupported(tag as char))
            }
            tag => Err(ParseError::UnsupportedType(tag as char)),
        }
    }

    /// `+<text>\r\n`
    fn parse_simple_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((line, consumed)) = read_line(buf)? else {
            return Ok(None);
        };
        Ok(Some((RespValue::SimpleString(line.to_string()), consumed)))
    }

    /// `-<message>\r\n`. A leading `ERR ` is removed since the encoder adds it back.
    fn parse_error(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((line, consumed)) = read_line(buf)? else {
            return Ok(None);
        };
        let message = line.strip_prefix(ERROR_PREFIX).unwrap_or(line);
        Ok(Some((RespValue::Error(message.to_string()), consumed)))
    }

    /// `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((line, consumed)) = read_line(buf)? else {
            return Ok(None);
        };
        let n: i64 = line
            .parse()
            .map_err(|e: std::num::ParseIntError| ParseError::Integer(e.to_string()))?;
        Ok(Some((RespValue::Integer(n), consumed)))
    }

    /// `$<length>\r\n<data>\r\n`; `$-1\r\n` decodes to an empty bulk string.
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((line, header_len)) = read_line(buf)? else {
            return Ok(None);
        };
        let length: i64 = line
            .parse()
            .map_err(|e: std::num::ParseIntError| ParseError::BulkLength(e.to_string()))?;

        if length == -1 {
            return Ok(Some((RespValue::BulkString(Bytes::new()), header_len)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total = header_len + length + CRLF.len();
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[header_len + length..total] != CRLF {
            return Err(ParseError::MissingCrlf);
        }

        let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// `*<count>\r\n<elements...>`; a count of zero or less is an empty array.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((line, header_len)) = read_line(buf)? else {
            return Ok(None);
        };
        let count: i64 = line
            .parse()
            .map_err(|e: std::num::ParseIntError| ParseError::ArrayLength(e.to_string()))?;

        if count <= 0 {
            return Ok(Some((RespValue::Array(Vec::new()), header_len)));
        }

        let count = count as usize;
        // Every element needs at least one tag byte and a CRLF.
        let mut elements = Vec::with_capacity(count.min(buf.len() / 3 + 1));
        let mut consumed = header_len;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Reads the line after the tag byte. Returns the text and the number of
/// bytes up to and including its CRLF.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    let Some(pos) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let line =
        std::str::from_utf8(&buf[1..1 + pos]).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    Ok(Some((line, 1 + pos + CRLF.len())))
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single frame with a throwaway parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
