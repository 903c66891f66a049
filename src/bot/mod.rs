//! Discord client
//!
//! The event handler keeps storage and [`BotStatus`] in sync with the guilds
//! the bot can see and routes prefix commands through the shared command
//! registry.

pub mod builtin;
pub mod render;
pub mod status;

use serde_json::json;
use serenity::async_trait;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::guild::{Guild, Member, UnavailableGuild};
use serenity::model::channel::Message;
use serenity::model::permissions::Permissions;
use serenity::model::user::OnlineStatus;
use serenity::prelude::{Context, EventHandler};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::commands::Caller;
use crate::core::storage::{MemberInfo, ServerInfo};
use crate::modules::ModuleServices;
use status::GuildSummary;

/// Gateway intents the bot needs
pub fn intents() -> GatewayIntents {
    GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT | GatewayIntents::GUILD_MEMBERS
}

pub struct Handler {
    services: Arc<ModuleServices>,
}

impl Handler {
    pub fn new(services: Arc<ModuleServices>) -> Self {
        Self { services }
    }

    async fn store_member(&self, server_id: &str, member: &Member) {
        let Some(storage) = &self.services.storage else {
            return;
        };
        if let Err(e) = storage.upsert_member(&member_info(server_id, member)).await {
            error!("Failed to store member {}: {}", member.user.id, e);
        }
    }
}

fn server_info(guild: &Guild) -> ServerInfo {
    ServerInfo {
        id: guild.id.to_string(),
        name: guild.name.clone(),
        owner_id: Some(guild.owner_id.to_string()),
        member_count: i64::try_from(guild.member_count).unwrap_or(i64::MAX),
        created_at: Some(guild.id.created_at().to_string()),
        data: json!({ "icon": guild.icon_url() }),
    }
}

fn member_info(server_id: &str, member: &Member) -> MemberInfo {
    MemberInfo {
        id: member.user.id.to_string(),
        server_id: server_id.to_string(),
        username: member.user.name.clone(),
        display_name: Some(member.display_name().to_string()),
        is_bot: member.user.bot,
        joined_at: member.joined_at.map(|t| t.to_string()),
        data: json!({}),
    }
}

fn guild_summary(guild: &Guild) -> GuildSummary {
    let online = guild
        .presences
        .values()
        .filter(|p| !matches!(p.status, OnlineStatus::Offline | OnlineStatus::Invisible))
        .count();
    GuildSummary {
        id: guild.id.to_string(),
        name: guild.name.clone(),
        member_count: guild.member_count,
        online_count: online as u64,
    }
}

/// Guild owners and holders of a role with the administrator bit
fn has_admin(is_owner: bool, role_permissions: impl IntoIterator<Item = Permissions>) -> bool {
    is_owner || role_permissions.into_iter().any(|p| p.administrator())
}

fn is_admin(ctx: &Context, msg: &Message) -> bool {
    let Some(guild_id) = msg.guild_id else {
        return false;
    };
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return false;
    };
    let Some(member) = guild.members.get(&msg.author.id) else {
        return guild.owner_id == msg.author.id;
    };
    // the @everyone role shares the guild's id
    let everyone = guild.roles.get(&guild_id.everyone_role()).map(|r| r.permissions);
    let roles = member
        .roles
        .iter()
        .filter_map(|id| guild.roles.get(id))
        .map(|r| r.permissions);
    has_admin(guild.owner_id == msg.author.id, everyone.into_iter().chain(roles))
}

fn author_name(msg: &Message) -> String {
    msg.member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone())
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🐕 {} is connected to {} guilds", ready.user.name, ready.guilds.len());
        self.services.status.set_ready(ready.user.name.clone());
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        debug!("Guild available: {} ({})", guild.name, guild.id);
        self.services.status.update_guild(guild_summary(&guild));

        let Some(storage) = &self.services.storage else {
            return;
        };
        if let Err(e) = storage.upsert_server(&server_info(&guild)).await {
            error!("Failed to store server {}: {}", guild.id, e);
            return;
        }
        let server_id = guild.id.to_string();
        for member in guild.members.values() {
            self.store_member(&server_id, member).await;
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            warn!("Guild {} became unavailable", incomplete.id);
        } else {
            info!("Removed from guild {}", incomplete.id);
        }
        self.services.status.remove_guild(&incomplete.id.to_string());
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        let server_id = new_member.guild_id.to_string();
        self.store_member(&server_id, &new_member).await;

        if let Some(storage) = &self.services.storage {
            let data = json!({
                "user_id": new_member.user.id.to_string(),
                "username": new_member.user.name,
            });
            if let Err(e) = storage.log_event(Some(&server_id), "member_join", &data).await {
                error!("Failed to log member join: {}", e);
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let prefix = &self.services.prefix;
        if !msg.content.starts_with(prefix.as_str()) {
            return;
        }

        let caller = Caller {
            author_id: msg.author.id.to_string(),
            author_name: author_name(&msg),
            guild_id: msg.guild_id.map(|id| id.to_string()),
            channel_id: msg.channel_id.to_string(),
            is_admin: is_admin(&ctx, &msg),
        };

        let Some(reply) = self.services.registry.dispatch(prefix, &msg.content, caller).await else {
            return;
        };
        if let Err(e) = render::send_reply(&ctx.http, msg.channel_id, reply).await {
            error!("Failed to send reply in {}: {}", msg.channel_id, e);
        }
    }
}
