//! Persisted module enable flags
//!
//! Stored as a JSON object keyed by module id:
//!
//! ```json
//! {
//!   "hello": { "enabled": true },
//!   "time_info": { "enabled": false }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::{error, info};

use crate::modules::ModuleError;

fn default_enabled() -> bool {
    true
}

/// Config entry for one module
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleConfigEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for ModuleConfigEntry {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// The module config file and its in-memory contents
#[derive(Debug, Clone)]
pub struct ModuleConfigs {
    path: PathBuf,
    entries: BTreeMap<String, ModuleConfigEntry>,
}

impl ModuleConfigs {
    /// Load the config file; a missing or unreadable file yields an empty config
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    error!("Invalid module config {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                error!("Failed to read module config {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    /// Write the config back as 2-space indented JSON
    pub fn save(&self) -> Result<(), ModuleError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Reconcile with the modules that exist on disk
    ///
    /// Returns true when entries were added or removed; the caller saves then.
    pub fn cleanup(&mut self, available: &[String]) -> bool {
        let available_set: HashSet<&str> = available.iter().map(String::as_str).collect();
        let before = self.entries.len();

        self.entries.retain(|id, _| available_set.contains(id.as_str()));
        let removed = before - self.entries.len();
        if removed > 0 {
            info!("Removed {} stale module config entries", removed);
        }

        let mut added = 0;
        for id in available {
            if !self.entries.contains_key(id) {
                self.entries.insert(id.clone(), ModuleConfigEntry::default());
                added += 1;
            }
        }
        if added > 0 {
            info!("Added {} new module config entries", added);
        }

        removed > 0 || added > 0
    }

    /// Enabled flag; unknown modules count as enabled
    pub fn is_enabled(&self, id: &str) -> bool {
        self.entries.get(id).map(|e| e.enabled).unwrap_or(true)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) {
        self.entries.entry(id.to_string()).or_default().enabled = enabled;
    }

    /// Add a default entry if none exists, returning true if one was added
    pub fn ensure(&mut self, id: &str) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        self.entries.insert(id.to_string(), ModuleConfigEntry::default());
        true
    }

    pub fn entries(&self) -> &BTreeMap<String, ModuleConfigEntry> {
        &self.entries
    }
}
