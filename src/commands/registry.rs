//! Dynamic command registry
//!
//! Modules register their commands when they load and drop them again when
//! they unload. A dispatch clones the command out of the registry before
//! running it, so unregistering mid-invocation is safe.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, warn};

use super::{parse_invocation, Caller, Command, CommandContext, CommandInfo, Embed, Reply};
use crate::modules::ModuleError;

struct Entry {
    owner: String,
    command: Command,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    commands: HashMap<String, Entry>,
    next_seq: u64,
}

/// Registry of every live command, keyed by name
#[derive(Default)]
pub struct CommandRegistry {
    inner: RwLock<Inner>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail if any of `commands` is already owned by someone other than `owner`
    pub fn check_conflicts(&self, owner: &str, commands: &[Command]) -> Result<(), ModuleError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Self::find_conflict(&inner, owner, commands)
    }

    fn find_conflict(inner: &Inner, owner: &str, commands: &[Command]) -> Result<(), ModuleError> {
        for command in commands {
            if let Some(existing) = inner.commands.get(&command.name) {
                if existing.owner != owner {
                    return Err(ModuleError::CommandConflict {
                        command: command.name.clone(),
                        owner: existing.owner.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Register commands for `owner`; nothing is registered if any name conflicts
    pub fn register(&self, owner: &str, commands: Vec<Command>) -> Result<usize, ModuleError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Self::find_conflict(&inner, owner, &commands)?;

        let count = commands.len();
        for command in commands {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            debug!("Registered command '{}' for {}", command.name, owner);
            inner.commands.insert(
                command.name.clone(),
                Entry {
                    owner: owner.to_string(),
                    command,
                    seq,
                },
            );
        }
        Ok(count)
    }

    /// Remove every command owned by `owner`, returning how many were removed
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.commands.len();
        inner.commands.retain(|_, entry| entry.owner != owner);
        before - inner.commands.len()
    }

    pub fn get(&self, name: &str) -> Option<Command> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.commands.get(name).map(|e| e.command.clone())
    }

    pub fn owner_of(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.commands.get(name).map(|e| e.owner.clone())
    }

    /// Commands owned by `owner`, in registration order
    pub fn commands_of(&self, owner: &str) -> Vec<CommandInfo> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<&Entry> = inner
            .commands
            .values()
            .filter(|e| e.owner == owner)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.command.info()).collect()
    }

    /// Distinct owners, sorted
    pub fn owners(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut owners: Vec<String> = inner.commands.values().map(|e| e.owner.clone()).collect();
        owners.sort();
        owners.dedup();
        owners
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse and run a prefix command
    ///
    /// Returns `None` when the message is not a known command.
    pub async fn dispatch(&self, prefix: &str, content: &str, caller: Caller) -> Option<Reply> {
        let (name, args) = parse_invocation(prefix, content)?;
        let command = self.get(&name)?;

        if command.admin_only && !caller.is_admin {
            warn!("{} tried to run admin command '{}'", caller.author_name, name);
            return Some(Reply::Embed(Embed::error(
                "❌ Permission Denied",
                "You need administrator permissions to use this command.",
            )));
        }

        let ctx = CommandContext {
            command: name.clone(),
            args,
            caller,
            prefix: prefix.to_string(),
        };

        match command.invoke(ctx).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                error!("Command error in '{}': {}", name, e);
                Some(Reply::Embed(Embed::error(
                    "❌ Command Error",
                    format!("An error occurred: {}", e),
                )))
            }
        }
    }
}
