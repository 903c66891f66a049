//! Settings panel: toggle and reload modules from the dashboard

use std::collections::BTreeMap;

use crate::modules::html::module_fragment;
use crate::modules::prelude::*;

const PANEL: &str = r#"
<div class="info-section">
    <h3>🧩 Modules</h3>
    <div id="settings-module-list" class="command-list">Loading…</div>
</div>
<div class="info-section">
    <h3>🤖 Bot</h3>
    <div id="settings-bot-info" class="api-result loading">Loading…</div>
</div>
<script>
(function () {
    async function loadModules() {
        const res = await fetch('/api/settings/get_modules');
        const data = await res.json();
        const list = document.getElementById('settings-module-list');
        list.innerHTML = '';
        for (const [id, info] of Object.entries(data.modules)) {
            const row = document.createElement('div');
            row.className = 'command-item';
            const label = document.createElement('span');
            label.textContent = `${info.name || id} ${info.loaded ? '(loaded)' : ''}`;
            row.appendChild(label);
            if (!info.is_system_module) {
                const button = document.createElement('button');
                button.textContent = info.enabled ? 'Disable' : 'Enable';
                button.onclick = () => toggle(id, info.enabled ? 'disable' : 'enable');
                row.appendChild(button);
            }
            list.appendChild(row);
        }
    }

    async function toggle(module, action) {
        await fetch('/api/settings/toggle_module', {
            method: 'POST',
            headers: { 'Content-Type': 'application/json' },
            body: JSON.stringify({ module, action })
        });
        loadModules();
    }

    async function loadBotInfo() {
        const res = await fetch('/api/settings/get_bot_info');
        const info = await res.json();
        const el = document.getElementById('settings-bot-info');
        el.className = 'api-result success';
        el.textContent = `Prefix: ${info.prefix} | Port: ${info.port} | Ready: ${info.ready}`;
    }

    loadModules();
    loadBotInfo();
})();
</script>
"#;

pub struct SettingsModule {
    meta: ModuleMeta,
}

pub fn create(spec: ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> {
    let meta = ModuleMeta::new(&spec.id, "Settings", "Manage bot modules and configuration")
        .with_icon("settings")
        .apply_spec(&spec);
    Ok(Arc::new(SettingsModule { meta }))
}

impl SettingsModule {
    async fn get_modules(&self, ctx: &ModuleContext) -> ApiResponse {
        let Some(manager) = ctx.manager() else {
            return ApiResponse::error("Module manager unavailable", 500);
        };
        let info = manager.module_info().await;

        let mut modules: BTreeMap<String, Value> = BTreeMap::new();
        for loaded in &info.loaded {
            let enabled = info.configs.get(&loaded.id).map(|c| c.enabled).unwrap_or(true);
            modules.insert(
                loaded.id.clone(),
                json!({
                    "name": loaded.name,
                    "description": loaded.description,
                    "icon": loaded.icon,
                    "version": loaded.version,
                    "dependencies": loaded.dependencies,
                    "commands": loaded.commands.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                    "loaded": true,
                    "enabled": enabled,
                    "is_system_module": loaded.is_system_module,
                }),
            );
        }
        for available in &info.available {
            modules.insert(
                available.id.clone(),
                json!({
                    "name": available.id,
                    "dependencies": available.dependencies,
                    "loaded": false,
                    "enabled": available.enabled,
                    "is_system_module": available.is_system_module,
                }),
            );
        }

        ApiResponse::ok(json!({ "modules": modules }))
    }

    async fn toggle_module(&self, request: &ApiRequest, ctx: &ModuleContext) -> ApiResponse {
        let module = request.param("module").filter(|m| !m.is_empty());
        let action = request.param("action");
        let (Some(module), Some(action @ ("enable" | "disable"))) = (module, action) else {
            return ApiResponse::error("Invalid request", 400);
        };
        let Some(manager) = ctx.manager() else {
            return ApiResponse::error("Module manager unavailable", 500);
        };

        if manager.is_system_module(module) {
            return ApiResponse::error("Cannot toggle system modules", 403);
        }

        let result = if action == "enable" {
            manager.enable_module(module).await
        } else {
            manager.disable_module(module).await
        };

        match result {
            Ok(success) => ApiResponse::ok(json!({ "success": success })),
            Err(ModuleError::SystemModule(_)) => {
                ApiResponse::error("Cannot toggle system modules", 403)
            }
            Err(e) => ApiResponse::error(e.to_string(), 500),
        }
    }

    async fn reload_module(&self, request: &ApiRequest, ctx: &ModuleContext) -> ApiResponse {
        let params = match request.require_params(&["module"]) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let Some(module) = params.get("module").and_then(Value::as_str) else {
            return ApiResponse::error("Invalid request", 400);
        };
        let Some(manager) = ctx.manager() else {
            return ApiResponse::error("Module manager unavailable", 500);
        };

        match manager.reload_module(module).await {
            Ok(loaded) => ApiResponse::success(json!({ "loaded": loaded })),
            Err(ModuleError::ModuleNotFound(id)) => {
                ApiResponse::error(format!("Module not found: {}", id), 404)
            }
            Err(e) => ApiResponse::error(e.to_string(), 500),
        }
    }

    fn bot_info(&self, ctx: &ModuleContext) -> ApiResponse {
        let status = ctx.status().snapshot();
        ApiResponse::ok(json!({
            "prefix": ctx.prefix(),
            "port": ctx.web_port(),
            "ready": status.ready,
            "user": status.user,
            "servers": status.servers,
        }))
    }
}

#[async_trait]
impl Module for SettingsModule {
    fn meta(&self) -> &ModuleMeta {
        &self.meta
    }

    fn html(&self, _ctx: &ModuleContext) -> String {
        module_fragment(&self.meta, PANEL)
    }

    async fn handle_api(&self, action: &str, request: ApiRequest, ctx: &ModuleContext) -> ApiResponse {
        match action {
            "get_modules" => self.get_modules(ctx).await,
            "toggle_module" => self.toggle_module(&request, ctx).await,
            "reload_module" => self.reload_module(&request, ctx).await,
            "get_bot_info" => self.bot_info(ctx),
            _ => crate::modules::traits::default_api(&self.meta, action, ctx),
        }
    }
}
