//! Command registry.

use crate::commands::{builtin, CommandError};
use crate::protocol::RespValue;
use crate::storage::Store;
use async_trait::async_trait;
use std::collections::HashMap;

/// How many frame elements a command accepts, the name included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// The frame must have exactly this many elements.
    Exactly(usize),
    /// The frame must have at least this many elements.
    AtLeast(usize),
}

impl Arity {
    /// Whether a frame of `len` elements satisfies the contract.
    pub fn accepts(&self, len: usize) -> bool {
        match *self {
            Arity::Exactly(n) => len == n,
            Arity::AtLeast(n) => len >= n,
        }
    }
}

/// What a command runs against.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    /// The shared key-value store.
    pub store: &'a dyn Store<RespValue>,
    /// The table the command was found in, for introspection.
    pub commands: &'a CommandTable,
}

/// A single command implementation, looked up by name at dispatch time.
#[async_trait]
pub trait Command: Send + Sync {
    /// Uppercase name the command is registered under.
    fn name(&self) -> &'static str;

    /// Checked by the dispatcher before [`Command::execute`] runs.
    fn arity(&self) -> Arity;

    /// Runs the command. `frame` is the whole request, name included, and has
    /// already passed the arity check.
    async fn execute(&self, frame: Vec<RespValue>, ctx: Context<'_>)
        -> Result<RespValue, CommandError>;
}

/// Name to command map. Filled once at startup and only read afterwards.
#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<&'static str, Box<dyn Command>>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandTable {
    /// An empty table. Use [`CommandTable::with_builtins`] for a server.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding GET, SET, DEL and COMMAND.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.register(Box::new(builtin::Get));
        table.register(Box::new(builtin::Set));
        table.register(Box::new(builtin::Del));
        table.register(Box::new(builtin::CommandList));
        table
    }

    /// Adds a command.
    ///
    /// # Panics
    ///
    /// Panics if the name is not uppercase or is already registered.
    pub fn register(&mut self, command: Box<dyn Command>) {
        let name = command.name();
        assert!(
            name.chars().all(|c| !c.is_ascii_lowercase()),
            "command name {name:?} must be uppercase"
        );
        if self.commands.insert(name, command).is_some() {
            panic!("command {name:?} registered twice");
        }
    }

    /// Looks up a command by its uppercase name.
    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|command| command.as_ref())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Command for Noop {
        fn name(&self) -> &'static str {
            self.0
        }

        fn arity(&self) -> Arity {
            Arity::AtLeast(1)
        }

        async fn execute(
            &self,
            _frame: Vec<RespValue>,
            _ctx: Context<'_>,
        ) -> Result<RespValue, CommandError> {
            Ok(RespValue::ok())
        }
    }

    #[test]
    fn test_arity() {
        assert!(Arity::Exactly(2).accepts(2));
        assert!(!Arity::Exactly(2).accepts(1));
        assert!(!Arity::Exactly(2).accepts(3));
        assert!(Arity::AtLeast(3).accepts(3));
        assert!(Arity::AtLeast(3).accepts(10));
        assert!(!Arity::AtLeast(3).accepts(2));
    }

    #[test]
    fn test_builtins() {
        let table = CommandTable::with_builtins();
        assert_eq!(table.names(), vec!["COMMAND", "DEL", "GET", "SET"]);
        assert_eq!(table.get("GET").map(|c| c.arity()), Some(Arity::Exactly(2)));
        assert_eq!(table.get("SET").map(|c| c.arity()), Some(Arity::AtLeast(3)));
        assert_eq!(table.get("DEL").map(|c| c.arity()), Some(Arity::AtLeast(2)));
        assert_eq!(
            table.get("COMMAND").map(|c| c.arity()),
            Some(Arity::AtLeast(1))
        );
        assert!(table.get("get").is_none());
    }

    #[test]
    fn test_register_custom() {
        let mut table = CommandTable::new();
        assert!(table.is_empty());
        table.register(Box::new(Noop("PING")));
        assert_eq!(table.len(), 1);
        assert!(table.get("PING").is_some());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut table = CommandTable::with_builtins();
        table.register(Box::new(Noop("GET")));
    }

    #[test]
    #[should_panic(expected = "must be uppercase")]
    fn test_lowercase_name_panics() {
        let mut table = CommandTable::new();
        table.register(Box::new(Noop("ping")));
    }
}
