//! Dashboard page

use crate::bot::status::StatusSnapshot;
use crate::modules::html::escape;
use crate::modules::manager::{AvailableSummary, LoadedSummary};

const PAGE_STYLE: &str = r#"
:root {
    --primary: #7c5cff;
    --surface: #1d1f2b;
    --border: #2f3244;
    --glass-bg: rgba(255, 255, 255, 0.04);
    --glass-border: rgba(255, 255, 255, 0.08);
    --text: #e6e6f0;
    --muted: #9a9cb0;
}
body { margin: 0; font-family: system-ui, sans-serif; background: #12131b; color: var(--text); }
nav { position: fixed; top: 0; bottom: 0; width: 240px; padding: 1.5rem; background: var(--surface); border-right: 1px solid var(--border); overflow-y: auto; }
nav a { display: flex; gap: .5rem; align-items: center; color: var(--text); text-decoration: none; padding: .4rem 0; }
nav .unloaded { color: var(--muted); }
main { margin-left: 290px; padding: 2rem; }
.stats { display: flex; gap: 1rem; margin-bottom: 2rem; }
.stat { background: var(--glass-bg); border: 1px solid var(--glass-border); border-radius: 12px; padding: 1rem 1.5rem; }
.stat strong { display: block; font-size: 1.6rem; }
section.module { margin-bottom: 3rem; }
.text-muted { color: var(--muted); }
"#;

fn nav_links(loaded: &[(LoadedSummary, String)], available: &[AvailableSummary]) -> String {
    let mut links = String::new();
    for (module, _) in loaded {
        links.push_str(&format!(
            "<a href=\"#module-{id}\"><i data-lucide=\"{icon}\"></i> {name}</a>\n",
            id = escape(&module.id),
            icon = escape(&module.icon),
            name = escape(&module.name),
        ));
    }
    for module in available {
        let note = if module.enabled { "not loaded" } else { "disabled" };
        links.push_str(&format!(
            "<a class=\"unloaded\"><i data-lucide=\"circle-off\"></i> {} <small>({})</small></a>\n",
            escape(&module.id),
            note
        ));
    }
    links
}

/// Full dashboard page: a nav entry per module, bot totals and every
/// loaded module's fragment
pub fn render_dashboard(
    prefix: &str,
    status: &StatusSnapshot,
    loaded: &[(LoadedSummary, String)],
    available: &[AvailableSummary],
) -> String {
    let sections: String = loaded
        .iter()
        .map(|(module, fragment)| {
            format!(
                "<section class=\"module\" id=\"module-{}\">\n{}\n</section>\n",
                escape(&module.id),
                fragment
            )
        })
        .collect();

    let connection = match &status.user {
        Some(user) if status.ready => format!("Connected as {}", escape(user)),
        _ => "Bot is not connected".to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Bark Dashboard</title>
<script src="https://unpkg.com/lucide@latest"></script>
<style>{style}</style>
</head>
<body>
<nav>
<h1>🐕 Bark</h1>
<p class="text-muted">Prefix <code>{prefix}</code></p>
{links}</nav>
<main>
<p class="text-muted" id="connection">{connection}</p>
<div class="stats">
    <div class="stat"><strong id="stat-servers">{servers}</strong>Servers</div>
    <div class="stat"><strong id="stat-members">{members}</strong>Members</div>
    <div class="stat"><strong id="stat-online">{online}</strong>Online</div>
</div>
{sections}</main>
<script>
lucide.createIcons();
async function refreshStats() {{
    const stats = await (await fetch('/api/dashboard/stats')).json();
    for (const key of ['servers', 'members', 'online']) {{
        document.getElementById('stat-' + key).textContent = stats[key];
    }}
}}
setInterval(refreshStats, 30000);
</script>
</body>
</html>"#,
        style = PAGE_STYLE,
        prefix = escape(prefix),
        links = nav_links(loaded, available),
        connection = connection,
        servers = status.servers,
        members = status.members,
        online = status.online,
        sections = sections,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleState;

    #[test]
    fn test_dashboard_lists_loaded_and_unloaded() {
        let loaded = vec![(
            LoadedSummary {
                id: "hello".into(),
                name: "Hello <World>".into(),
                description: String::new(),
                icon: "test-tube".into(),
                version: "1.0.0".into(),
                dependencies: vec![],
                is_system_module: false,
                state: ModuleState::Active,
                commands: vec![],
            },
            "<p>hello fragment</p>".to_string(),
        )];
        let available = vec![AvailableSummary {
            id: "weather".into(),
            dependencies: vec![],
            is_system_module: false,
            enabled: false,
        }];

        let page = render_dashboard("!", &StatusSnapshot::default(), &loaded, &available);
        assert!(page.contains("<section class=\"module\" id=\"module-hello\">"));
        assert!(page.contains("<p>hello fragment</p>"));
        assert!(page.contains("Hello &lt;World&gt;"));
        assert!(page.contains("weather <small>(disabled)</small>"));
        assert!(page.contains("Bot is not connected"));
    }
}
