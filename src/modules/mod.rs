//! Module system for hot-reloadable bot functionality
//!
//! A module bundles chat commands, a fragment of dashboard HTML and an HTTP
//! API handler. Modules live as TOML files in one of two directories: the
//! user module directory and the system module directory (system modules
//! cannot be disabled). The file's `kind` selects a compiled-in factory from
//! the [`ModuleCatalog`]; the rest of the file customises the instance.
//!
//! # Quick Start
//!
//! 1. Implement the `Module` trait
//! 2. Register a factory for it in the `ModuleCatalog`
//! 3. Drop a `<id>.toml` file with `kind = "<your kind>"` into `modules/`
//!
//! # Example
//!
//! ```ignore
//! use bark::modules::prelude::*;
//!
//! pub struct PingModule {
//!     meta: ModuleMeta,
//! }
//!
//! #[async_trait]
//! impl Module for PingModule {
//!     fn meta(&self) -> &ModuleMeta {
//!         &self.meta
//!     }
//!
//!     fn commands(&self, _ctx: &ModuleContext) -> Vec<Command> {
//!         vec![Command::new("ping", "Check that the bot is alive", |_inv| async {
//!             Ok(Reply::text("Pong!"))
//!         })]
//!     }
//! }
//!
//! fn create(spec: ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> {
//!     let meta = ModuleMeta::new(&spec.id, "Ping", "Replies to pings").apply_spec(&spec);
//!     Ok(Arc::new(PingModule { meta }))
//! }
//! ```

pub mod builtin;
pub mod catalog;
pub mod context;
pub mod deps;
pub mod html;
pub mod manager;
pub mod manifest;
pub mod traits;
pub mod watcher;

use std::collections::HashMap;

use axum::http::Method;
use serde_json::{json, Map, Value};
use thiserror::Error;

// Re-exports for convenience
pub use catalog::{ModuleCatalog, ModuleSpec};
pub use context::{ModuleContext, ModuleServices};
pub use manager::{ModuleManager, ModuleOrigin, ModuleState};
pub use manifest::{ModuleManifest, ModuleMeta};
pub use traits::Module;

/// Prelude for module development
pub mod prelude {
    pub use super::{
        ApiRequest, ApiResponse, Module, ModuleContext, ModuleError, ModuleMeta, ModuleSpec,
    };
    pub use crate::commands::{Command, CommandContext, Embed, Reply};
    pub use async_trait::async_trait;
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
}

/// Errors that can occur during module operations
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Unknown module kind: {0}")]
    UnknownKind(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(#[from] toml::de::Error),

    #[error("Command '{command}' is already registered by '{owner}'")]
    CommandConflict { command: String, owner: String },

    #[error("System module cannot be disabled: {0}")]
    SystemModule(String),

    #[error("Initialization failed: {0}")]
    InitFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Storage is not available")]
    StorageUnavailable,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

/// An HTTP request forwarded from the dashboard to a module
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method of the original request
    pub method: Method,

    /// Query string parameters
    pub query: HashMap<String, String>,

    /// JSON body, if one was sent and parsed
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Create a GET request with the given query parameters
    pub fn get(query: HashMap<String, String>) -> Self {
        Self {
            method: Method::GET,
            query,
            body: None,
        }
    }

    /// Create a POST request with a JSON body
    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            query: HashMap::new(),
            body: Some(body),
        }
    }

    /// Look up a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Look up a string field in the JSON body, falling back to the query
    pub fn param(&self, name: &str) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.get(name))
            .and_then(Value::as_str)
            .or_else(|| self.query_param(name))
    }

    /// Ensure the JSON body is an object containing every listed key
    pub fn require_params(&self, required: &[&str]) -> Result<&Map<String, Value>, ApiResponse> {
        let body = self
            .body
            .as_ref()
            .and_then(Value::as_object)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ApiResponse::error("No JSON data provided", 400))?;

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| !body.contains_key(*key))
            .collect();

        if missing.is_empty() {
            Ok(body)
        } else {
            Err(ApiResponse::error(
                format!("Missing parameters: {}", missing.join(", ")),
                400,
            ))
        }
    }
}

/// Response produced by a module API handler
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,

    /// JSON body
    pub body: Value,
}

impl ApiResponse {
    /// A 200 response with an arbitrary JSON body
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// A 200 response of `{"success": true}` merged with the given object
    pub fn success(data: Value) -> Self {
        let mut body = Map::new();
        body.insert("success".into(), Value::Bool(true));
        if let Value::Object(fields) = data {
            body.extend(fields);
        }
        Self::ok(Value::Object(body))
    }

    /// An error response of `{"error": message, "success": false}`
    pub fn error(message: impl Into<String>, status: u16) -> Self {
        Self {
            status,
            body: json!({ "error": message.into(), "success": false }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response_merges_fields() {
        let response = ApiResponse::success(json!({ "count": 3 }));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({ "success": true, "count": 3 }));

        let bare = ApiResponse::success(Value::Null);
        assert_eq!(bare.body, json!({ "success": true }));
    }

    #[test]
    fn test_error_response() {
        let response = ApiResponse::error("Unknown action", 404);
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.body["error"], "Unknown action");
        assert_eq!(response.body["success"], false);
    }

    #[test]
    fn test_require_params() {
        let request = ApiRequest::post(json!({ "module": "hello" }));
        let err = request.require_params(&["module", "action"]).unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(err.body["error"], "Missing parameters: action");

        let ok = request.require_params(&["module"]).unwrap();
        assert_eq!(ok["module"], "hello");

        let empty = ApiRequest::get(HashMap::new());
        let err = empty.require_params(&["module"]).unwrap_err();
        assert_eq!(err.body["error"], "No JSON data provided");
    }

    #[test]
    fn test_param_falls_back_to_query() {
        let mut query = HashMap::new();
        query.insert("server_id".to_string(), "42".to_string());
        let request = ApiRequest::get(query);
        assert_eq!(request.param("server_id"), Some("42"));
        assert_eq!(request.param("missing"), None);
    }
}
