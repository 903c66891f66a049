//! Dashboard routes

mod dashboard;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::modules::{ApiRequest, ModuleManager};

pub use dashboard::render_dashboard;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModuleManager>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct DashboardStats {
    servers: usize,
    members: u64,
    online: u64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let manager = &state.manager;
    let status = manager.services().status.snapshot();
    let loaded = manager.fragments().await;
    let available = manager.module_info().await.available;
    Html(render_dashboard(
        &manager.services().prefix,
        &status,
        &loaded,
        &available,
    ))
}

async fn dashboard_stats(State(state): State<AppState>) -> Json<DashboardStats> {
    let status = state.manager.services().status.snapshot();
    if !status.ready {
        return Json(DashboardStats {
            servers: 0,
            members: 0,
            online: 0,
        });
    }
    Json(DashboardStats {
        servers: status.servers,
        members: status.members,
        online: status.online,
    })
}

/// Bodies that are not valid JSON are passed on as `None`
fn parse_body(body: &Bytes) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice(body).ok()
}

async fn module_api(
    State(state): State<AppState>,
    Path((module, action)): Path<(String, String)>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let request = ApiRequest {
        method,
        query,
        body: parse_body(&body),
    };

    match state.manager.call_api(&module, &action, request).await {
        Some(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(response.body)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Module not found" })),
        )
            .into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route("/api/:module/:action", get(module_api).post(module_api))
}
