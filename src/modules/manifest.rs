//! Module files and metadata
//!
//! A module file is a small TOML document:
//!
//! ```toml
//! kind = "hello"
//! name = "Hello"
//! description = "Friendly greetings"
//! icon = "hand"
//! version = "1.2.0"
//! dependencies = ["module_list"]
//!
//! [settings]
//! greeting = "Howdy"
//! ```
//!
//! Dependency hints are also recovered by a plain text scan of the file, so a
//! file that fails to parse still takes part in load ordering.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;

use super::catalog::ModuleSpec;
use super::manager::ModuleOrigin;
use super::ModuleError;

fn default_icon() -> String {
    "puzzle".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Parsed contents of a module file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleManifest {
    /// Catalog entry used to build the module
    pub kind: String,

    /// Display name (falls back to the kind's own name)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Lucide icon name shown on the dashboard
    #[serde(default = "default_icon")]
    pub icon: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Modules that should be loaded before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Free-form settings handed to the module
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl ModuleManifest {
    /// Create a manifest for the given kind with default metadata
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            description: None,
            icon: default_icon(),
            version: default_version(),
            dependencies: Vec::new(),
            settings: Map::new(),
        }
    }

    /// Read and parse a module file
    pub async fn from_file(path: &Path) -> Result<Self, ModuleError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(text.parse()?)
    }

    /// Get a string setting
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    /// Get an unsigned integer setting
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(Value::as_u64)
    }
}

impl FromStr for ModuleManifest {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

/// Metadata describing a live module instance
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModuleMeta {
    /// Module id (the file stem)
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub version: String,
    pub dependencies: Vec<String>,

    /// Loaded from the system module directory
    pub system: bool,
}

impl ModuleMeta {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            icon: default_icon(),
            version: default_version(),
            dependencies: Vec::new(),
            system: false,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Overlay what the module file says on top of the kind's defaults
    ///
    /// Icon and version only override when the file changes them from their
    /// defaults, so a kind can ship its own icon.
    pub fn apply_spec(mut self, spec: &ModuleSpec) -> Self {
        let manifest = &spec.manifest;
        self.id = spec.id.clone();

        if let Some(name) = &manifest.name {
            self.name = name.clone();
        }
        if let Some(description) = &manifest.description {
            self.description = description.clone();
        }
        if manifest.icon != default_icon() {
            self.icon = manifest.icon.clone();
        }
        if manifest.version != default_version() {
            self.version = manifest.version.clone();
        }
        for dependency in &manifest.dependencies {
            if !self.dependencies.contains(dependency) {
                self.dependencies.push(dependency.clone());
            }
        }

        self.system = spec.origin == ModuleOrigin::System;
        self
    }

    /// Lower-cased name used to namespace stored data and events
    pub fn namespace(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Extract dependency hints from the raw text of a module file
///
/// Two forms are recognised, line by line:
/// - a comment `# DEPENDENCIES: a, b`
/// - an assignment such as `dependencies = ["a", "b"]`
///
/// Duplicates are dropped, keeping the first occurrence.
pub fn scan_dependencies(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for line in text.lines().map(str::trim) {
        let items = if let Some(rest) = line.strip_prefix("# DEPENDENCIES:") {
            rest
        } else if line.contains("dependencies")
            && line.contains('=')
            && line.contains('[')
            && !line.contains("self.dependencies")
        {
            bracketed(line)
        } else {
            continue;
        };

        for item in items.split(',') {
            let item = item.trim().trim_matches(|c| c == '"' || c == '\'').trim();
            if !item.is_empty() && !found.iter().any(|d| d == item) {
                found.push(item.to_string());
            }
        }
    }

    found
}

/// Text between the first `[` and the first `]` after it, empty if either is missing
fn bracketed(line: &str) -> &str {
    let Some(start) = line.find('[') else {
        return "";
    };
    let rest = &line[start + 1..];
    match rest.find(']') {
        Some(end) => &rest[..end],
        None => "",
    }
}

/// Scan a module file for dependency hints, treating read errors as "none"
pub fn read_dependencies(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => scan_dependencies(&text),
        Err(e) => {
            tracing::error!("Failed to read dependencies from {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
