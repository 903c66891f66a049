//! Per-module runtime context
//!
//! Each loaded module gets its own [`ModuleContext`]. It owns the module's
//! background tasks (aborted on unload) and gives namespaced access to
//! storage and the rest of the bot.

use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use super::manager::ModuleManager;
use super::ModuleError;
use crate::bot::status::BotStatus;
use crate::commands::{CommandInfo, CommandRegistry};
use crate::core::storage::Storage;

/// Services shared by every module
pub struct ModuleServices {
    /// Persistent store, absent when the database could not be opened
    pub storage: Option<Arc<Storage>>,
    pub registry: Arc<CommandRegistry>,
    pub status: Arc<BotStatus>,
    pub prefix: String,
    pub web_port: u16,
}

impl ModuleServices {
    pub fn new(
        storage: Option<Arc<Storage>>,
        registry: Arc<CommandRegistry>,
        status: Arc<BotStatus>,
        prefix: impl Into<String>,
        web_port: u16,
    ) -> Self {
        Self {
            storage,
            registry,
            status,
            prefix: prefix.into(),
            web_port,
        }
    }
}

/// Background tasks owned by one module instance
#[derive(Clone, Default)]
pub struct TaskSet {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskSet {
    pub fn push(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Abort every task, returning how many were still running
    pub fn abort_all(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let running = handles.iter().filter(|h| !h.is_finished()).count();
        for handle in handles {
            handle.abort();
        }
        running
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle a module uses to reach the rest of the bot
#[derive(Clone)]
pub struct ModuleContext {
    module_id: String,
    namespace: String,
    services: Arc<ModuleServices>,
    tasks: TaskSet,
    manager: Weak<ModuleManager>,
}

impl ModuleContext {
    pub fn new(
        module_id: impl Into<String>,
        name: &str,
        services: Arc<ModuleServices>,
        manager: Weak<ModuleManager>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            namespace: name.to_lowercase(),
            services,
            tasks: TaskSet::default(),
            manager,
        }
    }

    pub fn id(&self) -> &str {
        &self.module_id
    }

    /// Namespace used for stored data and event types
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn prefix(&self) -> &str {
        &self.services.prefix
    }

    pub fn web_port(&self) -> u16 {
        self.services.web_port
    }

    pub fn status(&self) -> &Arc<BotStatus> {
        &self.services.status
    }

    pub fn storage(&self) -> Option<&Arc<Storage>> {
        self.services.storage.as_ref()
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.services.registry
    }

    /// Commands this module currently has registered
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.services.registry.commands_of(&self.module_id)
    }

    /// The manager, if it is still alive
    pub fn manager(&self) -> Option<Arc<ModuleManager>> {
        self.manager.upgrade()
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    /// Spawn a task that is aborted when the module unloads
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Run `tick` every `period` until the module unloads
    ///
    /// The first tick fires immediately.
    pub fn spawn_interval<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
    }

    /// Read a stored value for this module
    pub async fn get_data(&self, server_id: &str, key: &str) -> Result<Option<Value>, ModuleError> {
        let storage = self.storage().ok_or(ModuleError::StorageUnavailable)?;
        Ok(storage.get_module_data(&self.namespace, server_id, key).await?)
    }

    /// Store a value for this module
    pub async fn set_data(&self, server_id: &str, key: &str, value: &Value) -> Result<(), ModuleError> {
        let storage = self.storage().ok_or(ModuleError::StorageUnavailable)?;
        storage
            .set_module_data(&self.namespace, server_id, key, value)
            .await?;
        Ok(())
    }

    /// Log an event as `<namespace>_<event>`; failures are logged and swallowed
    pub async fn log_event(&self, server_id: Option<&str>, event: &str, data: Value) {
        let Some(storage) = self.storage() else {
            return;
        };
        let event_type = format!("{}_{}", self.namespace, event);
        if let Err(e) = storage.log_event(server_id, &event_type, &data).await {
            warn!("Failed to log event {}: {}", event_type, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Services backed by an in-memory database
    pub async fn services() -> Arc<ModuleServices> {
        let storage = Storage::new_in_memory_async().await.unwrap();
        Arc::new(ModuleServices::new(
            Some(Arc::new(storage)),
            Arc::new(CommandRegistry::new()),
            Arc::new(BotStatus::new()),
            "!",
            5000,
        ))
    }

    pub async fn context(id: &str, name: &str) -> ModuleContext {
        ModuleContext::new(id, name, services().await, Weak::new())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_data_is_namespaced_by_name() {
        let ctx = context("hello", "Hello").await;
        assert_eq!(ctx.namespace(), "hello");

        ctx.set_data("1", "greetings", &json!(3)).await.unwrap();
        assert_eq!(ctx.get_data("1", "greetings").await.unwrap(), Some(json!(3)));
        assert_eq!(ctx.get_data("2", "greetings").await.unwrap(), None);

        let storage = ctx.storage().unwrap();
        assert_eq!(
            storage.get_module_data("hello", "1", "greetings").await.unwrap(),
            Some(json!(3))
        );
    }

    #[tokio::test]
    async fn test_log_event_prefixes_type() {
        let ctx = context("time_info", "Time Info").await;
        ctx.log_event(Some("9"), "viewed", json!({ "zone": "UTC" })).await;

        let events = ctx.storage().unwrap().get_events(Some("9"), None, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "time info_viewed");
    }

    #[tokio::test]
    async fn test_missing_storage() {
        let services = Arc::new(ModuleServices::new(
            None,
            Arc::new(CommandRegistry::new()),
            Arc::new(BotStatus::new()),
            "!",
            5000,
        ));
        let ctx = ModuleContext::new("hello", "Hello", services, Weak::new());
        assert!(matches!(
            ctx.get_data("1", "k").await,
            Err(ModuleError::StorageUnavailable)
        ));
        ctx.log_event(None, "ignored", Value::Null).await;
        assert!(ctx.manager().is_none());
    }

    #[tokio::test]
    async fn test_tasks_are_aborted() {
        let ctx = context("timer", "Timer").await;
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = ticks.clone();
        ctx.spawn_interval(Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ctx.tasks().len(), 1);

        assert_eq!(ctx.tasks().abort_all(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_abort = ticks.load(std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(after_abort > 0);
        assert_eq!(ticks.load(std::sync::atomic::Ordering::SeqCst), after_abort);
        assert!(ctx.tasks().is_empty());
    }
}
