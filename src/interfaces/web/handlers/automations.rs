use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::{ApiResponse, error_response, fail, ok};
use crate::core::executor::Trigger;
use crate::core::registry::AutomationEdits;
use crate::interfaces::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

fn automation_id(category: &str, slug: &str) -> String {
    format!("{}/{}", category, slug)
}

pub async fn list_automations(State(state): State<AppState>) -> ApiResponse {
    match state.engine.list().await {
        Ok(automations) => ok(json!({ "success": true, "automations": automations })),
        Err(e) => error_response(e),
    }
}

pub async fn rediscover(State(state): State<AppState>) -> ApiResponse {
    match state.engine.rediscover().await {
        Ok(count) => ok(json!({ "success": true, "discovered": count })),
        Err(e) => error_response(e),
    }
}

pub async fn get_automation(
    Path((category, slug)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResponse {
    match state.engine.get(&automation_id(&category, &slug)).await {
        Ok(automation) => ok(json!({ "success": true, "automation": automation })),
        Err(e) => error_response(e),
    }
}

pub async fn update_automation(
    Path((category, slug)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(edits): Json<AutomationEdits>,
) -> ApiResponse {
    if edits.enabled.is_none() && edits.schedule.is_none() && edits.tags.is_none() {
        return fail(
            StatusCode::BAD_REQUEST,
            "Nothing to update. Send enabled, schedule or tags.",
        );
    }
    match state
        .engine
        .update(&automation_id(&category, &slug), edits)
        .await
    {
        Ok(automation) => ok(json!({ "success": true, "automation": automation })),
        Err(e) => error_response(e),
    }
}

/// Runs to completion before responding. A failed run is still a 200: the
/// execution exists and carries the error.
pub async fn trigger_automation(
    Path((category, slug)): Path<(String, String)>,
    State(state): State<AppState>,
    body: Option<Json<TriggerRequest>>,
) -> ApiResponse {
    let target = body
        .and_then(|Json(req)| req.target)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    match state
        .engine
        .trigger(&automation_id(&category, &slug), Trigger::Api, target)
        .await
    {
        Ok(result) => ok(json!({
            "success": result.success,
            "execution_id": result.execution_id,
            "error": result.error,
            "metadata": result.metadata,
        })),
        Err(e) => error_response(e),
    }
}

pub async fn list_automation_executions(
    Path((category, slug)): Path<(String, String)>,
    Query(query): Query<ExecutionsQuery>,
    State(state): State<AppState>,
) -> ApiResponse {
    let id = automation_id(&category, &slug);
    if let Err(e) = state.engine.get(&id).await {
        return error_response(e);
    }
    match state.engine.executions(Some(&id), query.limit).await {
        Ok(executions) => ok(json!({ "success": true, "executions": executions })),
        Err(e) => error_response(e),
    }
}
