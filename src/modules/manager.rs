//! Module lifecycle management
//!
//! The manager discovers module files, orders them by their dependency hints,
//! builds instances through the catalog and keeps track of what is loaded.
//! Enabled flags are persisted to the module config file. Loads, reloads and
//! unloads are serialised by a single lock so a hot reload can never race a
//! dashboard toggle.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::catalog::{ModuleCatalog, ModuleSpec};
use super::context::{ModuleContext, ModuleServices};
use super::deps::resolve_load_order;
use super::manifest::{read_dependencies, ModuleManifest, ModuleMeta};
use super::traits::Module;
use super::watcher::{module_id_from_path, ModuleWatcher};
use super::{ApiRequest, ApiResponse, ModuleError};
use crate::commands::CommandInfo;
use crate::config::{ModuleConfigEntry, ModuleConfigs};

/// Which directory a module came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleOrigin {
    User,
    System,
}

/// Module state for lifecycle management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Instance built, commands registered, `on_load` running
    Loading,
    /// Fully loaded
    Active,
    /// `on_load` failed; about to be removed
    Failed,
    /// Being torn down
    Unloading,
}

/// A module file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableModule {
    pub id: String,
    pub origin: ModuleOrigin,
    pub path: PathBuf,
}

/// A live module instance
#[derive(Clone)]
pub struct LoadedModule {
    pub instance: Arc<dyn Module>,
    pub context: ModuleContext,
    pub origin: ModuleOrigin,
    pub path: PathBuf,
    pub state: ModuleState,
    /// Load sequence number
    pub load_order: u64,
}

impl LoadedModule {
    pub fn meta(&self) -> &ModuleMeta {
        self.instance.meta()
    }
}

/// Serializable view of a loaded module
#[derive(Debug, Clone, Serialize)]
pub struct LoadedSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub version: String,
    pub dependencies: Vec<String>,
    pub is_system_module: bool,
    pub state: ModuleState,
    pub commands: Vec<CommandInfo>,
}

/// Serializable view of a discovered module that is not loaded
#[derive(Debug, Clone, Serialize)]
pub struct AvailableSummary {
    pub id: String,
    pub dependencies: Vec<String>,
    pub is_system_module: bool,
    pub enabled: bool,
}

/// Everything the manager knows, for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub loaded: Vec<LoadedSummary>,
    pub available: Vec<AvailableSummary>,
    pub configs: BTreeMap<String, ModuleConfigEntry>,
    /// Dependencies of every discovered module: declared ones for loaded
    /// modules, scanned hints for the rest
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// Locations the manager works with
#[derive(Debug, Clone)]
pub struct ModuleDirs {
    pub modules: PathBuf,
    pub system_modules: PathBuf,
    pub config_file: PathBuf,
}

/// Module manager with hot reload support
pub struct ModuleManager {
    self_ref: Weak<ModuleManager>,
    dirs: ModuleDirs,
    catalog: ModuleCatalog,
    services: Arc<ModuleServices>,
    configs: Mutex<ModuleConfigs>,
    loaded: RwLock<HashMap<String, LoadedModule>>,
    load_lock: Mutex<()>,
    load_counter: AtomicU64,
    watchers: Mutex<Vec<ModuleWatcher>>,
    shutting_down: AtomicBool,
}

impl ModuleManager {
    pub fn new(dirs: ModuleDirs, catalog: ModuleCatalog, services: Arc<ModuleServices>) -> Arc<Self> {
        let configs = ModuleConfigs::load(&dirs.config_file);
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            dirs,
            catalog,
            services,
            configs: Mutex::new(configs),
            loaded: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
            load_counter: AtomicU64::new(0),
            watchers: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn services(&self) -> &Arc<ModuleServices> {
        &self.services
    }

    pub fn dirs(&self) -> &ModuleDirs {
        &self.dirs
    }

    // Discovery

    /// Module files in the user directory, then the system directory
    ///
    /// A user module shadows a system module with the same id.
    pub fn available_modules(&self) -> Vec<AvailableModule> {
        let mut found = scan_dir(&self.dirs.modules, ModuleOrigin::User);
        let user_ids: HashSet<String> = found.iter().map(|m| m.id.clone()).collect();

        for module in scan_dir(&self.dirs.system_modules, ModuleOrigin::System) {
            if user_ids.contains(&module.id) {
                warn!(
                    "User module '{}' shadows the system module of the same name",
                    module.id
                );
                continue;
            }
            found.push(module);
        }
        found
    }

    fn find_available(&self, id: &str) -> Option<AvailableModule> {
        self.available_modules().into_iter().find(|m| m.id == id)
    }

    /// Whether `id` comes from the system directory
    pub fn is_system_module(&self, id: &str) -> bool {
        self.find_available(id)
            .map(|m| m.origin == ModuleOrigin::System)
            .unwrap_or(false)
    }

    // Loading

    /// Load every enabled module in dependency order, returning how many loaded
    pub async fn load_all(&self) -> usize {
        let available = self.available_modules();
        let ids: Vec<String> = available.iter().map(|m| m.id.clone()).collect();

        let selected: Vec<&AvailableModule> = {
            let mut configs = self.configs.lock().await;
            if configs.cleanup(&ids) {
                if let Err(e) = configs.save() {
                    error!("Failed to save module config: {}", e);
                }
            }
            available
                .iter()
                .filter(|m| m.origin == ModuleOrigin::System || configs.is_enabled(&m.id))
                .collect()
        };

        let selected_ids: Vec<String> = selected.iter().map(|m| m.id.clone()).collect();
        let deps_of: HashMap<String, Vec<String>> = selected
            .iter()
            .map(|m| (m.id.clone(), read_dependencies(&m.path)))
            .collect();
        let order = resolve_load_order(&selected_ids, &deps_of);

        let mut loaded = 0;
        for id in &order.order {
            let Some(module) = selected.iter().find(|m| &m.id == id) else {
                continue;
            };
            match self.load_available(module).await {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to load module {}: {}", id, e),
            }
        }

        info!("Loaded {}/{} modules", loaded, selected_ids.len());
        loaded
    }

    /// Load (or replace) a module by id
    ///
    /// Returns `Ok(false)` when the module is disabled or the manager is shutting down.
    pub async fn load_module(&self, id: &str) -> Result<bool, ModuleError> {
        let module = self
            .find_available(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        self.load_available(&module).await
    }

    /// Reload a module from its file, user directory first
    pub async fn reload_module(&self, id: &str) -> Result<bool, ModuleError> {
        info!("Reloading module {}", id);
        self.load_module(id).await
    }

    async fn load_available(&self, module: &AvailableModule) -> Result<bool, ModuleError> {
        let _guard = self.load_lock.lock().await;
        let id = module.id.as_str();

        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("Not loading {}: manager is shutting down", id);
            return Ok(false);
        }

        if module.origin == ModuleOrigin::User && !self.configs.lock().await.is_enabled(id) {
            info!("Skipping disabled module {}", id);
            return Ok(false);
        }

        // Build the new instance before touching the old one
        let manifest = ModuleManifest::from_file(&module.path).await?;
        let instance = self.catalog.create(ModuleSpec {
            id: id.to_string(),
            origin: module.origin,
            path: module.path.clone(),
            manifest,
        })?;

        let missing = self.missing_dependencies(id, &instance.meta().dependencies).await;
        if !missing.is_empty() {
            warn!(
                "Module {} depends on modules that are not loaded: {}",
                id,
                missing.join(", ")
            );
        }

        let context = ModuleContext::new(
            id,
            &instance.meta().name,
            self.services.clone(),
            self.self_ref.clone(),
        );
        let commands = instance.commands(&context);
        self.services.registry.check_conflicts(id, &commands)?;

        // Swap out the previous instance
        self.unload_locked(id).await;
        self.services.registry.register(id, commands)?;

        let load_order = self.load_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.loaded.write().await.insert(
            id.to_string(),
            LoadedModule {
                instance: instance.clone(),
                context: context.clone(),
                origin: module.origin,
                path: module.path.clone(),
                state: ModuleState::Loading,
                load_order,
            },
        );

        if let Err(e) = instance.on_load(&context).await {
            error!("Module {} failed to initialize: {}", id, e);
            self.set_state(id, ModuleState::Failed).await;
            self.unload_locked(id).await;
            return Err(ModuleError::InitFailed(format!("{}: {}", id, e)));
        }
        self.set_state(id, ModuleState::Active).await;

        {
            let mut configs = self.configs.lock().await;
            if configs.ensure(id) {
                if let Err(e) = configs.save() {
                    error!("Failed to save module config: {}", e);
                }
            }
        }

        let meta = instance.meta();
        info!("Loaded module: {} v{} ({})", meta.name, meta.version, id);
        Ok(true)
    }

    async fn missing_dependencies(&self, id: &str, dependencies: &[String]) -> Vec<String> {
        let loaded = self.loaded.read().await;
        dependencies
            .iter()
            .filter(|d| d.as_str() != id && !loaded.contains_key(d.as_str()))
            .cloned()
            .collect()
    }

    async fn set_state(&self, id: &str, state: ModuleState) {
        if let Some(module) = self.loaded.write().await.get_mut(id) {
            debug!("Module {} is now {:?}", id, state);
            module.state = state;
        }
    }

    // Unloading

    /// Unload a module; returns `Ok(false)` if it was not loaded
    pub async fn unload_module(&self, id: &str) -> Result<bool, ModuleError> {
        let _guard = self.load_lock.lock().await;
        Ok(self.unload_locked(id).await)
    }

    /// Tear down a loaded module; the caller holds the load lock
    async fn unload_locked(&self, id: &str) -> bool {
        let module = {
            let mut loaded = self.loaded.write().await;
            let dependents: Vec<String> = loaded
                .iter()
                .filter(|(other, m)| other.as_str() != id && m.meta().dependencies.iter().any(|d| d == id))
                .map(|(other, _)| other.clone())
                .collect();

            let Some(module) = loaded.get_mut(id) else {
                return false;
            };
            if !dependents.is_empty() {
                warn!(
                    "Unloading {} while these modules depend on it: {}",
                    id,
                    dependents.join(", ")
                );
            }
            if module.state != ModuleState::Failed {
                module.state = ModuleState::Unloading;
            }
            module.clone()
        };

        let removed = self.services.registry.unregister_owner(id);
        let aborted = module.context.tasks().abort_all();
        module.instance.on_unload().await;
        self.loaded.write().await.remove(id);

        info!(
            "Unloaded module {} ({} commands removed, {} tasks stopped)",
            id, removed, aborted
        );
        true
    }

    // Enable / disable

    /// Mark a module enabled and load it
    pub async fn enable_module(&self, id: &str) -> Result<bool, ModuleError> {
        if self.find_available(id).is_none() {
            return Err(ModuleError::ModuleNotFound(id.to_string()));
        }
        self.set_enabled(id, true).await;
        self.load_module(id).await
    }

    /// Mark a module disabled and unload it
    pub async fn disable_module(&self, id: &str) -> Result<bool, ModuleError> {
        let module = self
            .find_available(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        if module.origin == ModuleOrigin::System {
            return Err(ModuleError::SystemModule(id.to_string()));
        }
        self.set_enabled(id, false).await;
        self.unload_module(id).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) {
        let mut configs = self.configs.lock().await;
        configs.set_enabled(id, enabled);
        if let Err(e) = configs.save() {
            error!("Failed to save module config: {}", e);
        }
        info!("Module {} {}", id, if enabled { "enabled" } else { "disabled" });
    }

    pub async fn is_enabled(&self, id: &str) -> bool {
        self.configs.lock().await.is_enabled(id)
    }

    // Queries

    pub async fn get(&self, id: &str) -> Option<LoadedModule> {
        self.loaded.read().await.get(id).cloned()
    }

    pub async fn is_loaded(&self, id: &str) -> bool {
        self.loaded.read().await.contains_key(id)
    }

    /// Loaded modules in load order
    pub async fn loaded_modules(&self) -> Vec<LoadedModule> {
        let mut modules: Vec<LoadedModule> = self.loaded.read().await.values().cloned().collect();
        modules.sort_by_key(|m| m.load_order);
        modules
    }

    pub async fn loaded_ids(&self) -> Vec<String> {
        self.loaded_modules()
            .await
            .into_iter()
            .map(|m| m.meta().id.clone())
            .collect()
    }

    pub async fn loaded_summaries(&self) -> Vec<LoadedSummary> {
        self.loaded_modules().await.iter().map(summarize).collect()
    }

    /// Snapshot of loaded, available and configured modules
    pub async fn module_info(&self) -> ModuleInfo {
        let loaded = self.loaded_summaries().await;
        let loaded_ids: HashSet<&str> = loaded.iter().map(|m| m.id.as_str()).collect();
        let configs = self.configs.lock().await.entries().clone();

        let available: Vec<AvailableSummary> = self
            .available_modules()
            .into_iter()
            .filter(|m| !loaded_ids.contains(m.id.as_str()))
            .map(|m| AvailableSummary {
                dependencies: read_dependencies(&m.path),
                is_system_module: m.origin == ModuleOrigin::System,
                enabled: configs.get(&m.id).map(|c| c.enabled).unwrap_or(true),
                id: m.id,
            })
            .collect();

        let dependencies = loaded
            .iter()
            .map(|m| (m.id.clone(), m.dependencies.clone()))
            .chain(available.iter().map(|m| (m.id.clone(), m.dependencies.clone())))
            .collect();

        ModuleInfo {
            loaded,
            available,
            configs,
            dependencies,
        }
    }

    /// Forward an API call; `None` if the module is not loaded
    pub async fn call_api(
        &self,
        id: &str,
        action: &str,
        request: ApiRequest,
    ) -> Option<ApiResponse> {
        let module = self.get(id).await?;
        debug!("API call {}/{}", id, action);
        Some(module.instance.handle_api(action, request, &module.context).await)
    }

    /// Dashboard fragment of every loaded module, in load order
    pub async fn fragments(&self) -> Vec<(LoadedSummary, String)> {
        self.loaded_modules()
            .await
            .iter()
            .map(|m| (summarize(m), m.instance.html(&m.context)))
            .collect()
    }

    // Hot reload

    /// Start watching both module directories
    pub async fn start_watching(&self) -> Result<(), ModuleError> {
        let mut watchers = self.watchers.lock().await;
        for dir in [&self.dirs.modules, &self.dirs.system_modules] {
            if !dir.is_dir() {
                warn!("Not watching {}: directory does not exist", dir.display());
                continue;
            }
            watchers.push(ModuleWatcher::start(dir, self.self_ref.clone())?);
            info!("Watching {} for module changes", dir.display());
        }
        Ok(())
    }

    pub async fn watcher_count(&self) -> usize {
        self.watchers.lock().await.len()
    }

    /// Stop the watchers and unload everything in reverse load order
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for watcher in self.watchers.lock().await.drain(..) {
            watcher.stop();
        }

        let mut ids = self.loaded_ids().await;
        ids.reverse();
        let _guard = self.load_lock.lock().await;
        for id in ids {
            self.unload_locked(&id).await;
        }
        info!("Module manager shut down");
    }
}

fn summarize(module: &LoadedModule) -> LoadedSummary {
    let meta = module.meta();
    LoadedSummary {
        id: meta.id.clone(),
        name: meta.name.clone(),
        description: meta.description.clone(),
        icon: meta.icon.clone(),
        version: meta.version.clone(),
        dependencies: meta.dependencies.clone(),
        is_system_module: module.origin == ModuleOrigin::System,
        state: module.state,
        commands: module.context.commands(),
    }
}

/// Module files in one directory, sorted by id
fn scan_dir(dir: &Path, origin: ModuleOrigin) -> Vec<AvailableModule> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot read module directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut found: Vec<AvailableModule> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            module_id_from_path(&path).map(|id| AvailableModule { id, origin, path })
        })
        .collect();
    found.sort_by(|a, b| a.id.cmp(&b.id));
    found
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::commands::{Caller, Command, Reply};
    use crate::modules::context::test_support;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Temp directories plus a manager over them
    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub manager: Arc<ModuleManager>,
    }

    impl Fixture {
        pub fn user_path(&self, id: &str) -> PathBuf {
            self.dir.path().join("modules").join(format!("{}.toml", id))
        }

        pub fn system_path(&self, id: &str) -> PathBuf {
            self.dir.path().join("system_modules").join(format!("{}.toml", id))
        }

        pub fn write_user(&self, id: &str, text: &str) {
            std::fs::write(self.user_path(id), text).unwrap();
        }

        pub fn write_system(&self, id: &str, text: &str) {
            std::fs::write(self.system_path(id), text).unwrap();
        }

        pub fn config_path(&self) -> PathBuf {
            self.dir.path().join("module_config.json")
        }
    }

    pub(crate) async fn fixture_with(catalog: ModuleCatalog) -> Fixture {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("modules")).unwrap();
        std::fs::create_dir_all(dir.path().join("system_modules")).unwrap();
        let dirs = ModuleDirs {
            modules: dir.path().join("modules"),
            system_modules: dir.path().join("system_modules"),
            config_file: dir.path().join("module_config.json"),
        };
        let manager = ModuleManager::new(dirs, catalog, test_support::services().await);
        Fixture { dir, manager }
    }

    pub(crate) async fn fixture() -> Fixture {
        fixture_with(test_catalog()).await
    }

    /// A module whose command echoes a setting, counting lifecycle calls
    struct Probe {
        meta: ModuleMeta,
        reply: String,
        fail_load: bool,
        unloads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Module for Probe {
        fn meta(&self) -> &ModuleMeta {
            &self.meta
        }

        fn commands(&self, _ctx: &ModuleContext) -> Vec<Command> {
            let reply = self.reply.clone();
            let name = self.meta.id.clone();
            vec![Command::new(name, "Probe command", move |_ctx| {
                let reply = reply.clone();
                async move { Ok(Reply::text(reply)) }
            })]
        }

        async fn on_load(&self, ctx: &ModuleContext) -> Result<(), ModuleError> {
            if self.fail_load {
                return Err(ModuleError::InitFailed("probe refused".into()));
            }
            ctx.spawn(std::future::pending());
            Ok(())
        }

        async fn on_unload(&self) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    static UNLOADS: std::sync::OnceLock<Arc<AtomicUsize>> = std::sync::OnceLock::new();

    fn unload_counter() -> Arc<AtomicUsize> {
        UNLOADS.get_or_init(|| Arc::new(AtomicUsize::new(0))).clone()
    }

    pub(crate) fn test_catalog() -> ModuleCatalog {
        let mut catalog = ModuleCatalog::builtin();
        catalog.register("probe", |spec: ModuleSpec| {
            let reply = spec
                .manifest
                .setting_str("reply")
                .unwrap_or("probe")
                .to_string();
            let fail_load = spec
                .manifest
                .settings
                .get("fail_load")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let meta = ModuleMeta::new(&spec.id, "Probe", "Test module").apply_spec(&spec);
            Ok(Arc::new(Probe {
                meta,
                reply,
                fail_load,
                unloads: unload_counter(),
            }) as Arc<dyn Module>)
        });
        catalog
    }

    async fn run(manager: &ModuleManager, content: &str) -> Option<Reply> {
        manager
            .services()
            .registry
            .dispatch("!", content, Caller::default())
            .await
    }

    #[tokio::test]
    async fn test_available_modules_user_shadows_system() {
        let fx = fixture().await;
        fx.write_user("b", "kind = \"probe\"");
        fx.write_user("a", "kind = \"probe\"");
        fx.write_user(".hidden", "kind = \"probe\"");
        std::fs::write(fx.dir.path().join("modules").join("notes.txt"), "x").unwrap();
        fx.write_system("a", "kind = \"probe\"");
        fx.write_system("core", "kind = \"probe\"");

        let found = fx.manager.available_modules();
        let ids: Vec<(&str, ModuleOrigin)> = found.iter().map(|m| (m.id.as_str(), m.origin)).collect();
        assert_eq!(
            ids,
            vec![
                ("a", ModuleOrigin::User),
                ("b", ModuleOrigin::User),
                ("core", ModuleOrigin::System),
            ]
        );
        assert!(fx.manager.is_system_module("core"));
        assert!(!fx.manager.is_system_module("a"));
    }

    #[tokio::test]
    async fn test_load_all_orders_by_dependencies() {
        let fx = fixture().await;
        fx.write_user("alpha", "kind = \"probe\"\ndependencies = [\"beta\"]");
        fx.write_user("beta", "kind = \"probe\"\n# DEPENDENCIES: gamma");
        fx.write_user("gamma", "kind = \"probe\"");

        assert_eq!(fx.manager.load_all().await, 3);
        assert_eq!(fx.manager.loaded_ids().await, vec!["gamma", "beta", "alpha"]);

        // New modules get a config entry
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(fx.config_path()).unwrap()).unwrap();
        assert_eq!(saved["alpha"], json!({ "enabled": true }));
    }

    #[tokio::test]
    async fn test_load_all_skips_disabled_but_not_system() {
        let fx = fixture().await;
        std::fs::write(
            fx.config_path(),
            r#"{"off": {"enabled": false}, "sys": {"enabled": false}, "stale": {"enabled": true}}"#,
        )
        .unwrap();
        let fx = Fixture {
            manager: ModuleManager::new(
                fx.manager.dirs().clone(),
                test_catalog(),
                fx.manager.services().clone(),
            ),
            dir: fx.dir,
        };
        fx.write_user("off", "kind = \"probe\"");
        fx.write_user("on", "kind = \"probe\"");
        fx.write_system("sys", "kind = \"probe\"");

        assert_eq!(fx.manager.load_all().await, 2);
        assert!(!fx.manager.is_loaded("off").await);
        assert!(fx.manager.is_loaded("on").await);
        assert!(fx.manager.is_loaded("sys").await);

        let info = fx.manager.module_info().await;
        assert!(!info.configs.contains_key("stale"));
        assert_eq!(info.available.len(), 1);
        assert_eq!(info.available[0].id, "off");
        assert!(!info.available[0].enabled);
    }

    #[tokio::test]
    async fn test_load_registers_commands_and_unload_removes_them() {
        let fx = fixture().await;
        fx.write_user("echo", "kind = \"probe\"\n[settings]\nreply = \"first\"");

        assert!(fx.manager.load_module("echo").await.unwrap());
        assert_eq!(run(&fx.manager, "!echo").await, Some(Reply::text("first")));

        let module = fx.manager.get("echo").await.unwrap();
        assert_eq!(module.state, ModuleState::Active);
        assert_eq!(module.context.tasks().len(), 1);

        assert!(fx.manager.unload_module("echo").await.unwrap());
        assert!(run(&fx.manager, "!echo").await.is_none());
        assert!(module.context.tasks().is_empty());
        assert!(!fx.manager.unload_module("echo").await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_replaces_instance() {
        let fx = fixture().await;
        fx.write_user("echo", "kind = \"probe\"\n[settings]\nreply = \"first\"");
        fx.manager.load_module("echo").await.unwrap();
        let first_order = fx.manager.get("echo").await.unwrap().load_order;
        let unloads_before = unload_counter().load(Ordering::SeqCst);

        fx.write_user("echo", "kind = \"probe\"\n[settings]\nreply = \"second\"");
        assert!(fx.manager.reload_module("echo").await.unwrap());

        assert_eq!(run(&fx.manager, "!echo").await, Some(Reply::text("second")));
        assert!(fx.manager.get("echo").await.unwrap().load_order > first_order);
        assert!(unload_counter().load(Ordering::SeqCst) > unloads_before);
        assert_eq!(fx.manager.loaded_ids().await, vec!["echo"]);
    }

    #[tokio::test]
    async fn test_broken_reload_keeps_old_instance() {
        let fx = fixture().await;
        fx.write_user("echo", "kind = \"probe\"\n[settings]\nreply = \"first\"");
        fx.manager.load_module("echo").await.unwrap();

        fx.write_user("echo", "kind = \"probe\"\n[settings\nreply = ");
        assert!(matches!(
            fx.manager.reload_module("echo").await,
            Err(ModuleError::InvalidManifest(_))
        ));
        assert_eq!(run(&fx.manager, "!echo").await, Some(Reply::text("first")));

        fx.write_user("echo", "kind = \"nonexistent\"");
        assert!(matches!(
            fx.manager.reload_module("echo").await,
            Err(ModuleError::UnknownKind(_))
        ));
        assert!(fx.manager.is_loaded("echo").await);
    }

    #[tokio::test]
    async fn test_command_conflict_rejects_new_module() {
        let fx = fixture().await;
        fx.write_user("echo", "kind = \"probe\"");
        fx.manager.load_module("echo").await.unwrap();
        fx.manager
            .services()
            .registry
            .register("core", vec![Command::new("clash", "", |_ctx| async { Ok(Reply::None) })])
            .unwrap();
        fx.write_user("clash", "kind = \"probe\"");

        match fx.manager.load_module("clash").await {
            Err(ModuleError::CommandConflict { command, owner }) => {
                assert_eq!(command, "clash");
                assert_eq!(owner, "core");
            }
            other => panic!("expected conflict, got {:?}", other.map(|_| ())),
        }
        assert!(!fx.manager.is_loaded("clash").await);
        assert!(fx.manager.is_loaded("echo").await);
    }

    #[tokio::test]
    async fn test_failed_on_load_unloads() {
        let fx = fixture().await;
        fx.write_user("bad", "kind = \"probe\"\n[settings]\nfail_load = true");

        assert!(matches!(
            fx.manager.load_module("bad").await,
            Err(ModuleError::InitFailed(_))
        ));
        assert!(!fx.manager.is_loaded("bad").await);
        assert!(run(&fx.manager, "!bad").await.is_none());
    }

    #[tokio::test]
    async fn test_enable_disable() {
        let fx = fixture().await;
        fx.write_user("echo", "kind = \"probe\"");
        fx.write_system("sys", "kind = \"probe\"");
        fx.manager.load_all().await;

        assert!(fx.manager.disable_module("echo").await.unwrap());
        assert!(!fx.manager.is_loaded("echo").await);
        assert!(!fx.manager.is_enabled("echo").await);
        assert!(!fx.manager.load_module("echo").await.unwrap());

        assert!(fx.manager.enable_module("echo").await.unwrap());
        assert!(fx.manager.is_loaded("echo").await);

        let saved = ModuleConfigs::load(fx.config_path());
        assert!(saved.is_enabled("echo"));

        assert!(matches!(
            fx.manager.disable_module("sys").await,
            Err(ModuleError::SystemModule(_))
        ));
        assert!(matches!(
            fx.manager.enable_module("ghost").await,
            Err(ModuleError::ModuleNotFound(_))
        ));
        assert!(matches!(
            fx.manager.disable_module("ghost").await,
            Err(ModuleError::ModuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_missing_module() {
        let fx = fixture().await;
        assert!(matches!(
            fx.manager.reload_module("ghost").await,
            Err(ModuleError::ModuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_module_info_and_api() {
        let fx = fixture().await;
        fx.write_user("echo", "kind = \"probe\"\ndependencies = [\"missing\"]");
        fx.manager.load_all().await;

        let info = fx.manager.module_info().await;
        assert_eq!(info.loaded.len(), 1);
        assert_eq!(info.loaded[0].commands[0].name, "echo");
        assert_eq!(info.dependencies["echo"], vec!["missing"]);

        let response = fx
            .manager
            .call_api("echo", "get_info", ApiRequest::get(HashMap::new()))
            .await
            .unwrap();
        assert_eq!(response.body["name"], "Probe");
        assert!(fx
            .manager
            .call_api("ghost", "get_info", ApiRequest::get(HashMap::new()))
            .await
            .is_none());

        let fragments = fx.manager.fragments().await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].1.contains("!echo"));
    }

    #[tokio::test]
    async fn test_no_loads_after_shutdown() {
        let fx = fixture().await;
        fx.write_user("echo", "kind = \"probe\"");
        fx.manager.load_all().await;
        fx.manager.shutdown().await;

        assert!(!fx.manager.reload_module("echo").await.unwrap());
        assert!(fx.manager.loaded_ids().await.is_empty());
        assert!(fx.manager.services().registry.is_empty());
    }

    #[tokio::test]
    async fn test_module_info_lists_hints_of_unloaded_modules() {
        let fx = fixture().await;
        fx.write_user("base", "kind = \"probe\"");
        fx.write_user("off", "# DEPENDENCIES: base\nkind = \"probe\"");
        fx.manager.load_all().await;
        fx.manager.disable_module("off").await.unwrap();

        let info = fx.manager.module_info().await;
        assert_eq!(info.available.len(), 1);
        assert_eq!(info.available[0].id, "off");
        assert_eq!(info.dependencies["off"], vec!["base"]);
        assert!(info.dependencies["base"].is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_unloads_everything() {
        let fx = fixture().await;
        fx.write_user("a", "kind = \"probe\"");
        fx.write_user("b", "kind = \"probe\"");
        fx.manager.load_all().await;
        fx.manager.start_watching().await.unwrap();
        assert_eq!(fx.manager.watcher_count().await, 2);

        fx.manager.shutdown().await;
        assert!(fx.manager.loaded_ids().await.is_empty());
        assert_eq!(fx.manager.watcher_count().await, 0);
        assert!(fx.manager.services().registry.is_empty());
    }
}
