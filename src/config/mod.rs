//! Application configuration

pub mod module_config;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use module_config::{ModuleConfigEntry, ModuleConfigs};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing)]
    pub bot_token: String,
    pub prefix: String,
    pub host: String,
    pub port: u16,
    pub modules_dir: PathBuf,
    pub system_modules_dir: PathBuf,
    pub module_config_file: PathBuf,
    pub database_path: PathBuf,
    pub hot_reload: bool,
    pub event_retention_days: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        Ok(Self {
            bot_token: lookup("BOT_TOKEN")
                .filter(|t| !t.trim().is_empty())
                .ok_or(ConfigError::MissingVar("BOT_TOKEN"))?,
            prefix: var("BOT_PREFIX", "!"),
            host: var("WEB_HOST", "0.0.0.0"),
            port: parse_var("WEB_PORT", lookup("WEB_PORT"), 5000)?,
            modules_dir: var("MODULES_DIR", "modules").into(),
            system_modules_dir: var("SYSTEM_MODULES_DIR", "system_modules").into(),
            module_config_file: var("MODULE_CONFIG_FILE", "module_config.json").into(),
            database_path: var("DATABASE_PATH", "bark_data.db").into(),
            hot_reload: parse_bool("HOT_RELOAD", lookup("HOT_RELOAD"), true)?,
            event_retention_days: parse_var("EVENT_RETENTION_DAYS", lookup("EVENT_RETENTION_DAYS"), 30)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: v }),
    }
}

fn parse_bool(name: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue { name, value: v }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("BOT_TOKEN", "secret")]).unwrap();
        assert_eq!(config.prefix, "!");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert_eq!(config.modules_dir, PathBuf::from("modules"));
        assert_eq!(config.system_modules_dir, PathBuf::from("system_modules"));
        assert_eq!(config.module_config_file, PathBuf::from("module_config.json"));
        assert_eq!(config.database_path, PathBuf::from("bark_data.db"));
        assert!(config.hot_reload);
        assert_eq!(config.event_retention_days, 30);
    }

    #[test]
    fn test_missing_token() {
        assert!(matches!(config(&[]), Err(ConfigError::MissingVar("BOT_TOKEN"))));
        assert!(matches!(
            config(&[("BOT_TOKEN", "  ")]),
            Err(ConfigError::MissingVar("BOT_TOKEN"))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("BOT_TOKEN", "secret"),
            ("BOT_PREFIX", "bark "),
            ("WEB_PORT", "8080"),
            ("HOT_RELOAD", "off"),
        ])
        .unwrap();
        assert_eq!(config.prefix, "bark ");
        assert_eq!(config.port, 8080);
        assert!(!config.hot_reload);
    }

    #[test]
    fn test_invalid_values() {
        match config(&[("BOT_TOKEN", "x"), ("WEB_PORT", "eighty")]) {
            Err(ConfigError::InvalidValue { name, value }) => {
                assert_eq!(name, "WEB_PORT");
                assert_eq!(value, "eighty");
            }
            other => panic!("expected invalid value, got {:?}", other.map(|c| c.port)),
        }
        assert!(config(&[("BOT_TOKEN", "x"), ("HOT_RELOAD", "maybe")]).is_err());
    }
}
