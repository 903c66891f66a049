//! Test and greeting commands

use crate::commands::colour;
use crate::modules::prelude::*;
use crate::modules::traits::default_api;

const DEFAULT_GREETING: &str = "Hello";

pub struct HelloModule {
    meta: ModuleMeta,
    greeting: String,
}

pub fn create(spec: ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> {
    let greeting = spec
        .manifest
        .setting_str("greeting")
        .unwrap_or(DEFAULT_GREETING)
        .to_string();
    let meta = ModuleMeta::new(&spec.id, "Hello", "A simple testing and hello module")
        .with_icon("test-tube")
        .apply_spec(&spec);
    Ok(Arc::new(HelloModule { meta, greeting }))
}

/// Bump the per-server greeting counter, returning the new total
async fn count_greeting(ctx: &ModuleContext, server_id: &str) -> Result<u64, ModuleError> {
    let current = ctx
        .get_data(server_id, "greetings")
        .await?
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let total = current + 1;
    ctx.set_data(server_id, "greetings", &json!(total)).await?;
    Ok(total)
}

async fn greet(ctx: ModuleContext, greeting: String, inv: CommandContext) -> Result<Reply, ModuleError> {
    let who = if inv.args.is_empty() {
        inv.caller.author_name.clone()
    } else {
        inv.rest()
    };

    if let Some(guild_id) = inv.caller.guild_id.as_deref() {
        match count_greeting(&ctx, guild_id).await {
            Ok(_) => {
                ctx.log_event(Some(guild_id), "greeted", json!({ "name": who }))
                    .await
            }
            Err(ModuleError::StorageUnavailable) => {}
            Err(e) => tracing::warn!("Failed to count greeting: {}", e),
        }
    }

    Ok(Reply::Embed(
        Embed::new("👋 Greetings!").description(format!("{}, {}! 👋", greeting, who)),
    ))
}

#[async_trait]
impl Module for HelloModule {
    fn meta(&self) -> &ModuleMeta {
        &self.meta
    }

    fn commands(&self, ctx: &ModuleContext) -> Vec<Command> {
        let name = self.meta.name.clone();
        let version = self.meta.version.clone();
        let test = Command::new(
            "test",
            "Test command to verify the module is working",
            move |_inv: CommandContext| {
                let embed = Embed::new("✅ Test Successful!")
                    .description("The test module is working correctly.")
                    .colour(colour::GREEN)
                    .field("Module", name.clone(), true)
                    .field("Version", version.clone(), true);
                async move { Ok(Reply::Embed(embed)) }
            },
        );

        let greeting = self.greeting.clone();
        let module_ctx = ctx.clone();
        let hello = Command::new("hello", "Say hello to someone", move |inv: CommandContext| {
            greet(module_ctx.clone(), greeting.clone(), inv)
        });

        vec![test, hello]
    }

    async fn handle_api(&self, action: &str, request: ApiRequest, ctx: &ModuleContext) -> ApiResponse {
        match action {
            "stats" => {
                let Some(server_id) = request.param("server_id") else {
                    return ApiResponse::error("Missing parameters: server_id", 400);
                };
                match ctx.get_data(server_id, "greetings").await {
                    Ok(count) => ApiResponse::success(json!({
                        "server_id": server_id,
                        "greetings": count.and_then(|v| v.as_u64()).unwrap_or(0),
                    })),
                    Err(e) => ApiResponse::error(e.to_string(), 500),
                }
            }
            _ => default_api(&self.meta, action, ctx),
        }
    }
}
