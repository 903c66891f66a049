//! Module trait with lifecycle hooks
//!
//! Every module kind implements [`Module`]. Only `meta` is required; the
//! remaining methods have defaults that give a plain command-list module.

use async_trait::async_trait;
use serde_json::json;

use super::context::ModuleContext;
use super::html;
use super::manifest::ModuleMeta;
use super::{ApiRequest, ApiResponse, ModuleError};
use crate::commands::Command;

/// Lifecycle of a module instance
///
/// ```text
/// load_module ──► Loading ──on_load ok──► Active ──unload──► Unloading ──► (gone)
///                    │
///                    └──on_load err──► Failed ──► (gone)
/// ```
#[async_trait]
pub trait Module: Send + Sync {
    /// Static metadata for this instance
    fn meta(&self) -> &ModuleMeta;

    /// Commands to register while the module is loaded
    fn commands(&self, _ctx: &ModuleContext) -> Vec<Command> {
        Vec::new()
    }

    /// Dashboard fragment
    fn html(&self, ctx: &ModuleContext) -> String {
        html::module_fragment(
            self.meta(),
            &html::command_list(ctx.prefix(), &ctx.commands()),
        )
    }

    /// Handle `/api/<module>/<action>`
    async fn handle_api(
        &self,
        action: &str,
        _request: ApiRequest,
        ctx: &ModuleContext,
    ) -> ApiResponse {
        default_api(self.meta(), action, ctx)
    }

    /// Called once the module's commands are registered
    ///
    /// Background timers should be started here with `ctx.spawn_interval`.
    async fn on_load(&self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called after the module's commands and tasks are gone
    async fn on_unload(&self) {}
}

/// Fallback API every module gets: `get_info`, 404 for anything else
pub fn default_api(meta: &ModuleMeta, action: &str, ctx: &ModuleContext) -> ApiResponse {
    match action {
        "get_info" => {
            let commands: Vec<String> = ctx.commands().into_iter().map(|c| c.name).collect();
            ApiResponse::ok(json!({
                "name": meta.name,
                "description": meta.description,
                "version": meta.version,
                "commands": commands,
            }))
        }
        _ => ApiResponse::error("Unknown action", 404),
    }
}
