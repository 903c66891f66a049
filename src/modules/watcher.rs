//! Hot reload from filesystem events
//!
//! One watcher per module directory. Changes to a module file are debounced
//! per path and turned into a delayed `reload_module` call on the runtime.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::TaskSet;
use super::manager::ModuleManager;
use super::ModuleError;

/// Events for the same path closer together than this are dropped
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Wait before reloading so the editor can finish writing
pub const RELOAD_DELAY: Duration = Duration::from_millis(500);

/// Module id for a module file path, or `None` if it is not a module file
pub fn module_id_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("toml") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

/// Per-path debounce
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Whether an event for `path` at `now` should be acted on
    pub fn accept(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(last) = self.last.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last.insert(path.to_path_buf(), now);
        true
    }
}

/// Module files touched by a create or modify event
fn changed_modules(event: &Event) -> Vec<(PathBuf, String)> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| !path.is_dir())
        .filter_map(|path| module_id_from_path(path).map(|id| (path.clone(), id)))
        .collect()
}

/// Watches one directory and reloads modules whose files change
pub struct ModuleWatcher {
    dir: PathBuf,
    // Dropping the notify watcher stops event delivery
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    // Reloads waiting out their delay
    reloads: TaskSet,
}

impl ModuleWatcher {
    /// Start watching `dir`; must be called from within the tokio runtime
    pub fn start(dir: &Path, manager: Weak<ModuleManager>) -> Result<Self, ModuleError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let watched = dir.to_path_buf();
        let reloads = TaskSet::default();
        let pending = reloads.clone();
        let task = tokio::spawn(async move {
            let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);
            while let Some(res) = rx.recv().await {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Watch error in {}: {}", watched.display(), e);
                        continue;
                    }
                };
                for (path, id) in changed_modules(&event) {
                    if !debouncer.accept(&path, Instant::now()) {
                        debug!("Debounced change to {}", path.display());
                        continue;
                    }
                    info!("Detected change in {}", path.display());
                    pending.push(schedule_reload(manager.clone(), id));
                }
            }
        });

        Ok(Self {
            dir: dir.to_path_buf(),
            _watcher: watcher,
            task,
            reloads,
        })
    }

    pub fn stop(self) {
        self.task.abort();
        let cancelled = self.reloads.abort_all();
        debug!(
            "Stopped watching {} ({} pending reloads cancelled)",
            self.dir.display(),
            cancelled
        );
    }
}

fn schedule_reload(manager: Weak<ModuleManager>, id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(RELOAD_DELAY).await;
        let Some(manager) = manager.upgrade() else {
            return;
        };
        match manager.reload_module(&id).await {
            Ok(true) => info!("Hot reloaded module {}", id),
            Ok(false) => debug!("Module {} changed but is disabled", id),
            Err(e) => error!("Failed to reload module {}: {}", id, e),
        }
    })
}
