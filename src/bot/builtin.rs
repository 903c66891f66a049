//! Commands that are always available: `help` and `reload`

use std::sync::Weak;

use crate::commands::{colour, Command, CommandContext, CommandInfo, CommandRegistry, Embed, Reply};
use crate::modules::manager::LoadedSummary;
use crate::modules::{ModuleError, ModuleManager};

/// Owner name for the built-in commands
pub const CORE_OWNER: &str = "core";

/// Register `help` and `reload` under [`CORE_OWNER`]
pub fn register_core_commands(
    registry: &CommandRegistry,
    manager: Weak<ModuleManager>,
) -> Result<usize, ModuleError> {
    registry.register(CORE_OWNER, core_commands(manager))
}

pub fn core_commands(manager: Weak<ModuleManager>) -> Vec<Command> {
    let help_manager = manager.clone();
    let help = Command::new(
        "help",
        "Show help for all modules or a specific module.",
        move |inv: CommandContext| help_command(help_manager.clone(), inv),
    );

    let reload = Command::new(
        "reload",
        "Reload a module from disk (admin only).",
        move |inv: CommandContext| reload_command(manager.clone(), inv),
    )
    .admin_only();

    vec![help, reload]
}

fn manager_gone() -> ModuleError {
    ModuleError::ExecutionFailed("module manager is not running".into())
}

async fn help_command(manager: Weak<ModuleManager>, inv: CommandContext) -> Result<Reply, ModuleError> {
    let manager = manager.upgrade().ok_or_else(manager_gone)?;
    let builtin = manager.services().registry.commands_of(CORE_OWNER);
    let modules = manager.loaded_summaries().await;
    Ok(Reply::Embed(help_embed(&inv.prefix, &builtin, &modules, inv.arg(0))))
}

async fn reload_command(manager: Weak<ModuleManager>, inv: CommandContext) -> Result<Reply, ModuleError> {
    let Some(module) = inv.arg(0) else {
        return Ok(Reply::Embed(Embed::error(
            "❌ Missing Module",
            format!(
                "Please specify a module to reload.\nExample: `{}reload hello`",
                inv.prefix
            ),
        )));
    };
    let manager = manager.upgrade().ok_or_else(manager_gone)?;
    if !manager.is_loaded(module).await {
        return Ok(Reply::Embed(Embed::error(
            "❌ Module Not Found",
            format!("Module `{}` is not currently loaded.", module),
        )));
    }

    let embed = match manager.reload_module(module).await {
        Ok(true) => Embed::new("✅ Module Reloaded")
            .description(format!("Successfully reloaded module `{}`.", module))
            .colour(colour::GREEN),
        Ok(false) => Embed::new("⚠️ Module Disabled")
            .description(format!("Module `{}` is disabled and was not loaded.", module))
            .colour(colour::ORANGE),
        Err(e) => Embed::error(
            "❌ Reload Failed",
            format!("Error reloading module `{}`: {}", module, e),
        ),
    };
    Ok(Reply::Embed(embed))
}

fn command_lines(prefix: &str, commands: &[CommandInfo]) -> String {
    if commands.is_empty() {
        return "No commands available.".to_string();
    }
    commands
        .iter()
        .map(|c| {
            let help = if c.help.is_empty() { "No description." } else { c.help.as_str() };
            format!("`{}{}` - {}", prefix, c.name, help)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build a help page
///
/// Page 1 lists the built-in commands and page `n` the `(n-1)`th loaded
/// module. `request` may be a page number or a module id or name.
pub fn help_embed(
    prefix: &str,
    builtin: &[CommandInfo],
    modules: &[LoadedSummary],
    request: Option<&str>,
) -> Embed {
    let total_pages = modules.len() + 1;

    let page = match request {
        None => 1,
        Some(arg) => match arg.parse::<usize>() {
            Ok(page) => page.clamp(1, total_pages),
            Err(_) => {
                let wanted = arg.to_lowercase();
                match modules
                    .iter()
                    .position(|m| m.id.to_lowercase() == wanted || m.name.to_lowercase() == wanted)
                {
                    Some(index) => index + 2,
                    None => {
                        return Embed::error(
                            "❌ Unknown Module",
                            format!(
                                "No loaded module named `{}`. Use `{}help` to list modules.",
                                arg, prefix
                            ),
                        )
                    }
                }
            }
        },
    };

    let footer = format!(
        "Use {}help <module> for module help. Page {}/{}",
        prefix, page, total_pages
    );

    if page == 1 {
        return Embed::new(format!("🐕 Bark Built-in Commands (Page 1/{})", total_pages))
            .description(format!(
                "These are always available. Use `{}help <module>` for module help.",
                prefix
            ))
            .field("Commands", command_lines(prefix, builtin), false)
            .footer(footer);
    }

    let module = &modules[page - 2];
    let description = if module.description.is_empty() {
        "No description.".to_string()
    } else {
        module.description.clone()
    };
    Embed::new(format!("Help: {} (Page {}/{})", module.name, page, total_pages))
        .description(description)
        .colour(colour::GOLD)
        .field("Commands", command_lines(prefix, &module.commands), false)
        .footer(footer)
}
