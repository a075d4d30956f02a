//! GET, SET, DEL and COMMAND.

use crate::commands::args::{DelArgs, GetArgs, SetArgs};
use crate::commands::{Arity, Command, CommandError, Context};
use crate::protocol::RespValue;
use crate::storage::Store;
use async_trait::async_trait;

/// Hands a stored value back, refusing anything a client would misread.
fn reply_with(value: Option<RespValue>) -> Result<RespValue, CommandError> {
    match value {
        None => Ok(RespValue::null()),
        Some(value) if value.is_replyable() => Ok(value),
        Some(_) => Err(CommandError::Internal("value is not a valid type".into())),
    }
}

/// `GET key`: the live value, or nil.
pub struct Get;

#[async_trait]
impl Command for Get {
    fn name(&self) -> &'static str {
        "GET"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(2)
    }

    async fn execute(
        &self,
        frame: Vec<RespValue>,
        ctx: Context<'_>,
    ) -> Result<RespValue, CommandError> {
        let args = GetArgs::parse(&frame)?;
        reply_with(ctx.store.get(&args.key).await?)
    }
}

/// `SET key value [EX seconds | PX milliseconds] [NX | XX] [GET]`
pub struct Set;

#[async_trait]
impl Command for Set {
    fn name(&self) -> &'static str {
        "SET"
    }

    fn arity(&self) -> Arity {
        Arity::AtLeast(3)
    }

    /// With GET the reply is the previous value (or nil). Otherwise it is
    /// `+OK`, or nil when NX or XX skipped the write.
    async fn execute(
        &self,
        frame: Vec<RespValue>,
        ctx: Context<'_>,
    ) -> Result<RespValue, CommandError> {
        let SetArgs {
            key,
            value,
            options,
        } = SetArgs::parse(frame)?;

        let outcome = ctx.store.set(key, value, options).await?;

        if options.get {
            reply_with(outcome.previous)
        } else if outcome.written {
            Ok(RespValue::ok())
        } else {
            Ok(RespValue::null())
        }
    }
}

/// `DEL key [key ...]`: how many of the keys were live and removed.
pub struct Del;

#[async_trait]
impl Command for Del {
    fn name(&self) -> &'static str {
        "DEL"
    }

    fn arity(&self) -> Arity {
        Arity::AtLeast(2)
    }

    async fn execute(
        &self,
        frame: Vec<RespValue>,
        ctx: Context<'_>,
    ) -> Result<RespValue, CommandError> {
        let args = DelArgs::parse(&frame)?;

        let mut deleted = 0;
        for key in &args.keys {
            if ctx.store.del(key).await? {
                deleted += 1;
            }
        }
        Ok(RespValue::integer(deleted))
    }
}

/// `COMMAND`: the names of every registered command.
pub struct CommandList;

#[async_trait]
impl Command for CommandList {
    fn name(&self) -> &'static str {
        "COMMAND"
    }

    fn arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    async fn execute(
        &self,
        _frame: Vec<RespValue>,
        ctx: Context<'_>,
    ) -> Result<RespValue, CommandError> {
        let names = ctx
            .commands
            .names()
            .into_iter()
            .map(RespValue::bulk_string)
            .collect();
        Ok(RespValue::array(names))
    }
}
