//! `modules` command listing what is loaded

use crate::commands::colour;
use crate::modules::html::{command_list, module_fragment};
use crate::modules::prelude::*;

pub struct ModuleListModule {
    meta: ModuleMeta,
}

pub fn create(spec: ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> {
    let meta = ModuleMeta::new(&spec.id, "Module List", "List all currently loaded Bark modules.")
        .with_icon("list")
        .apply_spec(&spec);
    Ok(Arc::new(ModuleListModule { meta }))
}

async fn list_modules(ctx: ModuleContext) -> Result<Reply, ModuleError> {
    let manager = ctx
        .manager()
        .ok_or_else(|| ModuleError::ExecutionFailed("module manager is gone".into()))?;
    let loaded = manager.loaded_summaries().await;

    let embed = Embed::new("Loaded Bark Modules");
    let embed = if loaded.is_empty() {
        embed
            .description("No modules are currently loaded.")
            .colour(colour::ORANGE)
    } else {
        let lines: Vec<String> = loaded
            .iter()
            .map(|m| format!("• **{}** v{} (`{}`)", m.name, m.version, m.id))
            .collect();
        embed
            .description(lines.join("\n"))
            .footer(format!("Total: {} modules loaded", loaded.len()))
    };
    Ok(Reply::Embed(embed))
}

#[async_trait]
impl Module for ModuleListModule {
    fn meta(&self) -> &ModuleMeta {
        &self.meta
    }

    fn commands(&self, ctx: &ModuleContext) -> Vec<Command> {
        let module_ctx = ctx.clone();
        vec![Command::new(
            "modules",
            "List all currently loaded Bark modules.",
            move |_inv: CommandContext| list_modules(module_ctx.clone()),
        )]
    }

    fn html(&self, ctx: &ModuleContext) -> String {
        let intro = format!(
            "<p>List all currently loaded Bark modules with the <code>{}modules</code> command.</p>",
            crate::modules::html::escape(ctx.prefix())
        );
        module_fragment(
            &self.meta,
            &format!("{}\n{}", intro, command_list(ctx.prefix(), &ctx.commands())),
        )
    }
}
