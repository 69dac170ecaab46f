use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::server::AppState;

#[derive(Serialize)]
struct HubSummary {
    hub_name: String,
    module_key: String,
    domain: String,
    port: u16,
}

fn hub_summaries(state: &AppState) -> Vec<HubSummary> {
    state
        .hub_registry
        .iter()
        .map(|route| HubSummary {
            hub_name: route.name.clone(),
            module_key: route.module_key.to_string(),
            domain: route.domain.clone(),
            port: route.listen_port,
        })
        .collect()
}

fn module_record(state: &AppState, metadata: anyhub_core::module::ModuleMetadata) -> Value {
    let hook_status = state.hook_registry.status(metadata.key);
    json!({
        "key": metadata.key,
        "description": metadata.description,
        "migration_state": metadata.migration_state,
        "supported_protocols": metadata.supported_protocols,
        "cache_strategy": metadata.cache_strategy,
        "hook_status": hook_status,
    })
}

/// `GET /-/modules` (§4.H).
pub async fn list_modules(State(state): State<AppState>) -> Json<Value> {
    let modules: Vec<Value> = anyhub_modules::all_metadata()
        .into_iter()
        .map(|m| module_record(&state, m))
        .collect();
    Json(json!({
        "modules": modules,
        "hubs": hub_summaries(&state),
    }))
}

/// `GET /-/modules/<key>` (§4.H). 404 with `module_not_found` when unknown.
pub async fn get_module(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match anyhub_modules::metadata_for(&key) {
        Some(metadata) => Ok(Json(module_record(&state, metadata))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "module_not_found"})),
        )),
    }
}
