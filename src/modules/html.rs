//! Dashboard HTML helpers shared by modules

use crate::commands::CommandInfo;

use super::manifest::ModuleMeta;

const MODULE_STYLE: &str = r#"
<style>
.{css_id}-container {
    display: grid;
    grid-template-columns: repeat(auto-fit, minmax(300px, 1fr));
    gap: 1.5rem;
}
.{css_id}-container .info-section {
    background: var(--glass-bg);
    border: 1px solid var(--glass-border);
    border-radius: 12px;
    padding: 1.5rem;
}
.{css_id}-container .command-item {
    background: var(--surface);
    border: 1px solid var(--border);
    border-radius: 8px;
    padding: 1rem;
}
.{css_id}-container .command-item code {
    font-family: 'Courier New', monospace;
    color: var(--primary);
    font-weight: bold;
}
</style>
"#;

/// Escape text for inclusion in HTML
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap module content in the standard header and container
///
/// `content` is inserted as-is.
pub fn module_fragment(meta: &ModuleMeta, content: &str) -> String {
    let css_id = meta.id.replace('_', "-");
    format!(
        r#"<div class="module-header">
    <h2><i data-lucide="{icon}"></i> {name}</h2>
    <p>{description}</p>
</div>
<div class="{css_id}-container">
    {content}
</div>
{style}"#,
        icon = escape(&meta.icon),
        name = escape(&meta.name),
        description = escape(&meta.description),
        css_id = css_id,
        content = content,
        style = MODULE_STYLE.replace("{css_id}", &css_id),
    )
}

/// The "Commands" section listing each command with its help text
pub fn command_list(prefix: &str, commands: &[CommandInfo]) -> String {
    let items = if commands.is_empty() {
        r#"<p class="text-muted">No commands available</p>"#.to_string()
    } else {
        commands
            .iter()
            .map(|cmd| {
                let help = if cmd.help.is_empty() {
                    "No description available"
                } else {
                    cmd.help.as_str()
                };
                format!(
                    r#"<div class="command-item"><code>{}{}</code> <span>{}</span></div>"#,
                    escape(prefix),
                    escape(&cmd.name),
                    escape(help)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"<div class="info-section">
    <h3>📋 Commands</h3>
    <div class="command-list">
{}
    </div>
</div>"#,
        items
    )
}
