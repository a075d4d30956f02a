//! RESP wire codec.
//!
//! - `types`: the `RespValue` model and its encoder
//! - `parser`: the incremental decoder
//!
//! ```
//! use tidekv::protocol::{parse_message, RespValue};
//!
//! let (value, consumed) = parse_message(b"*1\r\n$7\r\nCOMMAND\r\n").unwrap().unwrap();
//! assert_eq!(consumed, 17);
//! assert_eq!(value, RespValue::array(vec![RespValue::bulk_string("COMMAND")]));
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
