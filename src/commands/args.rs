//! Argument parsing for the built-in commands.

use crate::commands::CommandError;
use crate::protocol::RespValue;
use crate::storage::SetOptions;
use bytes::Bytes;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Reads a value as a key. Bulk strings, simple strings and integers (as
/// their decimal text) qualify.
pub fn key(value: &RespValue) -> Result<Bytes, CommandError> {
    match value {
        RespValue::BulkString(b) => Ok(b.clone()),
        RespValue::SimpleString(s) => Ok(Bytes::from(s.clone())),
        RespValue::Integer(n) => Ok(Bytes::from(n.to_string())),
        _ => Err(CommandError::InvalidKey),
    }
}

/// Reads a signed integer from an Integer or a bulk string holding one.
pub fn integer(value: Option<&RespValue>) -> Result<i64, CommandError> {
    match value {
        None => Err(CommandError::ArgumentRequired),
        Some(RespValue::Integer(n)) => Ok(*n),
        Some(RespValue::BulkString(b)) => std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CommandError::syntax("value is not an integer")),
        Some(_) => Err(CommandError::syntax("value is not an integer")),
    }
}

/// `GET key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetArgs {
    pub key: Bytes,
}

impl GetArgs {
    /// Reads the key from `GET key`.
    pub fn parse(frame: &[RespValue]) -> Result<Self, CommandError> {
        let arg = frame.get(1).ok_or(CommandError::ArgumentRequired)?;
        Ok(Self { key: key(arg)? })
    }
}

/// `DEL key [key ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelArgs {
    pub keys: Vec<Bytes>,
}

impl DelArgs {
    /// Reads every key after the command name.
    pub fn parse(frame: &[RespValue]) -> Result<Self, CommandError> {
        let keys = frame.iter().skip(1).map(key).collect::<Result<_, _>>()?;
        Ok(Self { keys })
    }
}

/// `SET key value [EX seconds | PX milliseconds] [NX | XX] [GET]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetArgs {
    pub key: Bytes,
    pub value: RespValue,
    pub options: SetOptions,
}

impl SetArgs {
    /// Options are matched case-insensitively and checked once the whole
    /// frame has been scanned, so `SET k v NX XX` reports the conflict rather
    /// than whichever flag came second.
    pub fn parse(frame: Vec<RespValue>) -> Result<Self, CommandError> {
        let mut frame = frame.into_iter().skip(1);

        let key = key(&frame.next().ok_or(CommandError::ArgumentRequired)?)?;
        let value = frame.next().ok_or(CommandError::ArgumentRequired)?;

        let mut options = SetOptions::default();
        let mut ex: Option<i64> = None;
        let mut px: Option<i64> = None;

        while let Some(token) = frame.next() {
            let RespValue::BulkString(token) = token else {
                return Err(CommandError::OptionNotBulkString);
            };

            match String::from_utf8_lossy(&token).to_uppercase().as_str() {
                "EX" => ex = Some(integer(frame.next().as_ref())?),
                "PX" => px = Some(integer(frame.next().as_ref())?),
                "NX" => options.nx = true,
                "XX" => options.xx = true,
                "GET" => options.get = true,
                other => {
                    return Err(CommandError::syntax(format!(
                        "unsupported option '{other}'"
                    )))
                }
            }
        }

        if options.nx && options.xx {
            return Err(CommandError::syntax(
                "NX and XX options cannot be used together",
            ));
        }

        options.expire = match (ex, px) {
            (Some(_), Some(_)) => {
                return Err(CommandError::syntax(
                    "EX and PX options cannot be used together",
                ))
            }
            (Some(secs), None) => Some(expire_millis(
                positive(secs)?
                    .checked_mul(1000)
                    .ok_or_else(invalid_expire)?,
            )?),
            (None, Some(ms)) => Some(expire_millis(positive(ms)?)?),
            (None, None) => None,
        };

        Ok(Self {
            key,
            value,
            options,
        })
    }
}

fn positive(n: i64) -> Result<u64, CommandError> {
    if n <= 0 {
        return Err(CommandError::syntax(
            "EX or PX option must be greater than 0",
        ));
    }
    Ok(n as u64)
}

fn invalid_expire() -> CommandError {
    CommandError::syntax("invalid expire time")
}

/// Turns a TTL into a `Duration`, refusing one whose absolute expiry would
/// not fit in signed milliseconds since the Unix epoch or on the monotonic
/// clock.
fn expire_millis(ms: u64) -> Result<Duration, CommandError> {
    let ttl = Duration::from_millis(ms);
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let fits_epoch = since_epoch
        .checked_add(ttl)
        .is_some_and(|at| at.as_millis() <= i64::MAX as u128);
    if !fits_epoch || Instant::now().checked_add(ttl).is_none() {
        return Err(invalid_expire());
    }
    Ok(ttl)
}
