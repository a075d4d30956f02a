//! Turns decoded frames into replies.

use crate::commands::{CommandError, CommandTable, Context};
use crate::protocol::RespValue;
use crate::storage::Store;
use std::sync::Arc;
use tracing::{debug, trace};

/// Runs command frames against a shared store.
///
/// Cheap to clone: every connection gets its own copy sharing the table and
/// the store.
#[derive(Clone)]
pub struct CommandHandler {
    commands: Arc<CommandTable>,
    store: Arc<dyn Store<RespValue>>,
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl CommandHandler {
    /// A handler with the built-in command set.
    pub fn new(store: Arc<dyn Store<RespValue>>) -> Self {
        Self::with_table(Arc::new(CommandTable::with_builtins()), store)
    }

    /// A handler over a caller-built table, e.g. one with extra commands.
    pub fn with_table(commands: Arc<CommandTable>, store: Arc<dyn Store<RespValue>>) -> Self {
        Self { commands, store }
    }

    /// The store commands run against.
    pub fn store(&self) -> &Arc<dyn Store<RespValue>> {
        &self.store
    }

    /// Executes one frame and always produces a reply: failures become error
    /// values instead of propagating.
    pub async fn execute(&self, frame: RespValue) -> RespValue {
        let result = match frame.into_array() {
            Some(frame) => self.dispatch(frame).await,
            None => Err(CommandError::NotArray),
        };

        result.unwrap_or_else(|e| {
            debug!(error = %e, "Command rejected");
            e.into_resp()
        })
    }

    /// Validates the command name and arity, then runs the command.
    pub async fn dispatch(&self, frame: Vec<RespValue>) -> Result<RespValue, CommandError> {
        let name = match frame.first() {
            Some(RespValue::BulkString(name)) => String::from_utf8_lossy(name).to_uppercase(),
            _ => return Err(CommandError::NameNotBulkString),
        };

        let command = self
            .commands
            .get(&name)
            .ok_or_else(|| CommandError::Unknown(name.clone()))?;

        if !command.arity().accepts(frame.len()) {
            return Err(CommandError::WrongArity(command.name()));
        }

        trace!(command = command.name(), args = frame.len() - 1, "Dispatching");

        let ctx = Context {
            store: self.store.as_ref(),
            commands: &self.commands,
        };
        command.execute(frame, ctx).await
    }
}
