//! Chat commands
//!
//! Commands are owned by whoever registered them (a module id, or `core` for
//! the built-ins) and live in a shared [`CommandRegistry`]. Replies are
//! transport-neutral; the bot layer turns them into Discord messages.

pub mod registry;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use crate::modules::ModuleError;

pub use registry::CommandRegistry;

/// Async command callback
pub type CommandHandler =
    Arc<dyn Fn(CommandContext) -> BoxFuture<'static, Result<Reply, ModuleError>> + Send + Sync>;

/// A prefix command
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub help: String,

    /// Only server administrators may run this command
    pub admin_only: bool,

    handler: CommandHandler,
}

impl Command {
    pub fn new<F, Fut>(name: impl Into<String>, help: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, ModuleError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            help: help.into(),
            admin_only: false,
            handler: Arc::new(move |ctx| handler(ctx).boxed()),
        }
    }

    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            name: self.name.clone(),
            help: self.help.clone(),
            admin_only: self.admin_only,
        }
    }

    /// Run the handler
    pub fn invoke(&self, ctx: CommandContext) -> BoxFuture<'static, Result<Reply, ModuleError>> {
        (self.handler)(ctx)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("help", &self.help)
            .field("admin_only", &self.admin_only)
            .finish()
    }
}

/// Serializable description of a command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub help: String,
    pub admin_only: bool,
}

/// Who sent a command, and where
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub author_id: String,
    pub author_name: String,
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub is_admin: bool,
}

/// Everything a command handler gets to see
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Command name as typed
    pub command: String,

    /// Whitespace-separated arguments
    pub args: Vec<String>,

    pub caller: Caller,

    /// Prefix the bot is listening on
    pub prefix: String,
}

impl CommandContext {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// All arguments joined back together
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }
}

/// Embed colours
pub mod colour {
    pub const BLUE: u32 = 0x3498db;
    pub const GREEN: u32 = 0x2ecc71;
    pub const RED: u32 = 0xe74c3c;
    pub const ORANGE: u32 = 0xe67e22;
    pub const GOLD: u32 = 0xf1c40f;
}

/// A rich reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub colour: u32,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            colour: colour::BLUE,
            fields: Vec::new(),
            footer: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn colour(mut self, colour: u32) -> Self {
        self.colour = colour;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    /// The standard red error embed
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title).description(description).colour(colour::RED)
    }
}

/// What a command sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Embed(Embed),
    None,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

impl From<Embed> for Reply {
    fn from(embed: Embed) -> Self {
        Self::Embed(embed)
    }
}

/// Split `"<prefix><name> <args>"` into the command name and its arguments
pub fn parse_invocation(prefix: &str, content: &str) -> Option<(String, Vec<String>)> {
    let body = content.trim_start().strip_prefix(prefix)?;
    let mut parts = body.split_whitespace();
    let name = parts.next()?;
    if body.starts_with(char::is_whitespace) {
        return None;
    }
    Some((name.to_string(), parts.map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invocation() {
        assert_eq!(
            parse_invocation("!", "!hello  world  again"),
            Some(("hello".to_string(), vec!["world".to_string(), "again".to_string()]))
        );
        assert_eq!(parse_invocation("!", "!help"), Some(("help".to_string(), vec![])));
        assert_eq!(parse_invocation("!", "hello"), None);
        assert_eq!(parse_invocation("!", "!"), None);
        assert_eq!(parse_invocation("!", "! hello"), None);
        assert_eq!(parse_invocation("bark ", "bark modules"), Some(("modules".to_string(), vec![])));
    }

    #[tokio::test]
    async fn test_command_invoke() {
        let cmd = Command::new("echo", "Echo arguments", |ctx: CommandContext| async move {
            Ok(Reply::text(ctx.rest()))
        });
        assert!(!cmd.admin_only);
        assert_eq!(cmd.info().name, "echo");

        let ctx = CommandContext {
            command: "echo".into(),
            args: vec!["a".into(), "b".into()],
            caller: Caller::default(),
            prefix: "!".into(),
        };
        assert_eq!(cmd.invoke(ctx).await.unwrap(), Reply::text("a b"));
    }

    #[test]
    fn test_embed_builder() {
        let embed = Embed::new("Title")
            .description("Body")
            .field("Name", "Value", true)
            .footer("Footer");
        assert_eq!(embed.colour, colour::BLUE);
        assert_eq!(embed.fields.len(), 1);
        assert_eq!(Embed::error("Oops", "bad").colour, colour::RED);
    }
}
