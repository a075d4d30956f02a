//! Command table and dispatch.
//!
//! ```text
//!  RespValue::Array ──> CommandHandler::dispatch
//!                          │  name must be a bulk string
//!                          │  uppercase, look up in CommandTable
//!                          │  check Arity
//!                          ▼
//!                       Command::execute ──> Store
//! ```
//!
//! Handlers never touch the socket. Every failure comes back as a
//! [`CommandError`] and is turned into an error reply by the handler.

pub mod args;
pub mod builtin;
pub mod handler;
pub mod table;

use crate::protocol::RespValue;
use crate::storage::StoreError;
use thiserror::Error;

pub use handler::CommandHandler;
pub use table::{Arity, Command, CommandTable, Context};

/// Reasons a command frame can be rejected. The message never carries the
/// `ERR ` prefix; the encoder adds it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command must be an array")]
    NotArray,

    #[error("command must be a bulk string")]
    NameNotBulkString,

    #[error("unsupported command '{0}'")]
    Unknown(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("key is not valid")]
    InvalidKey,

    #[error("argument required")]
    ArgumentRequired,

    #[error("option is not a bulk string")]
    OptionNotBulkString,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn syntax(msg: impl Into<String>) -> Self {
        CommandError::Syntax(msg.into())
    }

    /// The error reply sent to the client.
    pub fn into_resp(self) -> RespValue {
        RespValue::error(self.to_string())
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Internal(e.to_string())
    }
}
