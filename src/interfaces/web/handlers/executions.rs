use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiResponse, error_response, fail, ok};
use crate::core::store::types::StepStatus;
use crate::interfaces::web::AppState;

/// Progress report from an external runtime.
#[derive(Debug, Deserialize)]
pub struct RemoteStepRequest {
    pub step_name: String,
    pub status: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn get_execution(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    match state.engine.execution(&id).await {
        Ok(execution) => ok(json!({ "success": true, "execution": execution })),
        Err(e) => error_response(e),
    }
}

pub async fn list_steps(Path(id): Path<String>, State(state): State<AppState>) -> ApiResponse {
    if let Err(e) = state.engine.execution(&id).await {
        return error_response(e);
    }
    match state.engine.steps(&id).await {
        Ok(steps) => ok(json!({ "success": true, "steps": steps })),
        Err(e) => error_response(e),
    }
}

pub async fn record_step(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<RemoteStepRequest>,
) -> ApiResponse {
    let step_name = payload.step_name.trim();
    if step_name.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "step_name is required");
    }
    let Some(status) = StepStatus::from_status(payload.status.trim()) else {
        return fail(
            StatusCode::BAD_REQUEST,
            format!(
                "Unknown step status '{}'. Use started, completed or failed.",
                payload.status
            ),
        );
    };
    match state
        .engine
        .record_remote_step(&id, step_name, status, payload.metadata)
        .await
    {
        Ok(step_id) => ok(json!({ "success": true, "step_id": step_id })),
        Err(e) => error_response(e),
    }
}
