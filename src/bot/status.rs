//! Live bot status shared with the dashboard and modules

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

/// What the dashboard shows about one guild
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GuildSummary {
    pub id: String,
    pub name: String,
    pub member_count: u64,
    pub online_count: u64,
}

/// Point-in-time copy of [`BotStatus`]
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub ready: bool,
    pub user: Option<String>,
    pub servers: usize,
    pub members: u64,
    pub online: u64,
    pub guilds: Vec<GuildSummary>,
}

#[derive(Debug, Default)]
pub struct BotStatus {
    ready: AtomicBool,
    user: RwLock<Option<String>>,
    guilds: RwLock<BTreeMap<String, GuildSummary>>,
}

impl BotStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, user: impl Into<String>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user.into());
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_disconnected(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn update_guild(&self, guild: GuildSummary) {
        self.guilds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(guild.id.clone(), guild);
    }

    pub fn remove_guild(&self, id: &str) {
        self.guilds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let guilds: Vec<GuildSummary> = self
            .guilds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        StatusSnapshot {
            ready: self.is_ready(),
            user: self.user.read().unwrap_or_else(PoisonError::into_inner).clone(),
            servers: guilds.len(),
            members: guilds.iter().map(|g| g.member_count).sum(),
            online: guilds.iter().map(|g| g.online_count).sum(),
            guilds,
        }
    }
}
