//! Member lookups backed by storage

use crate::commands::colour;
use crate::core::storage::MemberRecord;
use crate::modules::prelude::*;
use crate::modules::traits::default_api;

pub struct MemberInfoModule {
    meta: ModuleMeta,
}

pub fn create(spec: ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> {
    let meta = ModuleMeta::new(&spec.id, "Member Info", "Show information about server members")
        .with_icon("user")
        .apply_spec(&spec);
    Ok(Arc::new(MemberInfoModule { meta }))
}

/// Strip a `<@id>` / `<@!id>` mention down to the id
fn mention_id(arg: &str) -> &str {
    arg.trim_start_matches("<@")
        .trim_start_matches('!')
        .trim_end_matches('>')
}

fn day(timestamp: &Option<String>) -> String {
    timestamp
        .as_deref()
        .map(|t| t.get(..10).unwrap_or(t).to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn member_embed(member: &MemberRecord) -> Embed {
    let display = member.display_name.as_deref().unwrap_or(&member.username);
    Embed::new(format!("Info for {}", display))
        .colour(colour::GREEN)
        .field("Username", member.username.clone(), true)
        .field("ID", member.id.clone(), true)
        .field("Joined Server", day(&member.joined_at), true)
        .field("First Seen", day(&Some(member.first_seen.clone())), true)
        .field("Bot", if member.is_bot { "Yes" } else { "No" }, true)
}

async fn member_info(ctx: ModuleContext, inv: CommandContext) -> Result<Reply, ModuleError> {
    let Some(guild_id) = inv.caller.guild_id.as_deref() else {
        return Ok(Reply::text("This command only works in a server."));
    };
    let storage = ctx.storage().ok_or(ModuleError::StorageUnavailable)?;
    let member_id = inv
        .arg(0)
        .map(mention_id)
        .unwrap_or(inv.caller.author_id.as_str());

    match storage.get_member(member_id, guild_id).await? {
        Some(member) => Ok(Reply::Embed(member_embed(&member))),
        None => Ok(Reply::Embed(Embed::error(
            "Member not found",
            format!("No stored information for member `{}`.", member_id),
        ))),
    }
}

#[async_trait]
impl Module for MemberInfoModule {
    fn meta(&self) -> &ModuleMeta {
        &self.meta
    }

    fn commands(&self, ctx: &ModuleContext) -> Vec<Command> {
        let module_ctx = ctx.clone();
        vec![Command::new(
            "memberinfo",
            "Show information about a member (defaults to you).",
            move |inv: CommandContext| member_info(module_ctx.clone(), inv),
        )]
    }

    async fn handle_api(&self, action: &str, request: ApiRequest, ctx: &ModuleContext) -> ApiResponse {
        if action != "get_member" {
            return default_api(&self.meta, action, ctx);
        }

        let (Some(member_id), Some(server_id)) =
            (request.param("member_id"), request.param("server_id"))
        else {
            return ApiResponse::error("Missing parameters: member_id, server_id", 400);
        };
        let Some(storage) = ctx.storage() else {
            return ApiResponse::error("Storage is not available", 503);
        };

        match storage.get_member(member_id, server_id).await {
            Ok(Some(member)) => ApiResponse::ok(json!({ "member": member })),
            Ok(None) => ApiResponse::error("Member not found", 404),
            Err(e) => ApiResponse::error(e.to_string(), 500),
        }
    }
}
