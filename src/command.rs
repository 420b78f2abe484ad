//! Command execution collaborator.
//!
//! The transport hands command strings to this registry; the real command
//! language lives above this crate, so tokenisation here is a plain
//! whitespace split. The contract the transport relies on: execution either
//! succeeds or fails with a runtime error the caller logs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::context::Context;
use crate::error::{RemoteError, Result};

type CommandFn = Rc<dyn Fn(&[String], &mut Context) -> Result<()>>;

/// Name → implementation registry.
pub struct CommandManager {
    commands: RefCell<HashMap<String, CommandFn>>,
}

impl CommandManager {
    pub fn new() -> CommandManager {
        CommandManager {
            commands: RefCell::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        command: impl Fn(&[String], &mut Context) -> Result<()> + 'static,
    ) {
        self.commands
            .borrow_mut()
            .insert(name.into(), Rc::new(command));
    }

    /// Execute a command line. Empty lines are a no-op; unknown commands
    /// fail with a runtime error.
    pub fn execute(&self, command_line: &str, context: &mut Context) -> Result<()> {
        let mut tokens: Vec<String> = command_line.split_whitespace().map(String::from).collect();
        if tokens.is_empty() {
            return Ok(());
        }
        let name = tokens.remove(0);
        let command = self.commands.borrow().get(&name).cloned();
        match command {
            Some(command) => command(&tokens, context),
            None => Err(RemoteError::runtime(format!("no such command: {name}"))),
        }
    }
}

impl Default for CommandManager {
    fn default() -> CommandManager {
        CommandManager::new()
    }
}
