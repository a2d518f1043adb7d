use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::{ApiResponse, error_response, fail, ok};
use crate::core::fetch::is_fetchable;
use crate::interfaces::web::AppState;
use crate::pipeline::{self, Stage};

#[derive(Debug, Deserialize)]
pub struct CreateToolRequest {
    pub name: String,
    pub website: String,
    #[serde(default)]
    pub description: String,
    /// Queue research right away. On unless explicitly turned off.
    #[serde(default = "default_queue")]
    pub queue: bool,
}

fn default_queue() -> bool {
    true
}

pub async fn create_tool(
    State(state): State<AppState>,
    Json(payload): Json<CreateToolRequest>,
) -> ApiResponse {
    let name = payload.name.trim();
    let website = payload.website.trim();
    if name.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "Tool name is required");
    }
    if !is_fetchable(website) {
        return fail(
            StatusCode::BAD_REQUEST,
            format!("'{}' is not an http(s) URL", website),
        );
    }

    let tool = match state
        .store
        .create_tool(name, website, payload.description.trim())
        .await
    {
        Ok(tool) => tool,
        Err(e) => return error_response(e),
    };
    let tool = if payload.queue {
        match pipeline::enqueue(&state.store, &tool.id, Stage::Research).await {
            Ok(tool) => tool,
            Err(e) => return error_response(e),
        }
    } else {
        tool
    };
    (
        StatusCode::CREATED,
        Json(json!({ "success": true, "tool": tool })),
    )
}

pub async fn list_tools(State(state): State<AppState>) -> ApiResponse {
    match state.store.list_tools().await {
        Ok(tools) => ok(json!({ "success": true, "tools": tools })),
        Err(e) => error_response(e),
    }
}

pub async fn get_tool(Path(id): Path<String>, State(state): State<AppState>) -> ApiResponse {
    let tool = match state.store.get_tool(&id).await {
        Ok(Some(tool)) => tool,
        Ok(None) => return fail(StatusCode::NOT_FOUND, format!("tool '{}' not found", id)),
        Err(e) => return error_response(e),
    };
    match state.store.get_draft(&id).await {
        Ok(draft) => ok(json!({ "success": true, "tool": tool, "draft": draft })),
        Err(e) => error_response(e),
    }
}

pub async fn queue_stage(
    Path((id, stage)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResponse {
    let Some(stage) = Stage::parse(&stage) else {
        return fail(
            StatusCode::BAD_REQUEST,
            format!(
                "Unknown stage '{}'. Use research, analysis, directory or newsletter.",
                stage
            ),
        );
    };
    match pipeline::enqueue(&state.store, &id, stage).await {
        Ok(tool) => ok(json!({ "success": true, "tool": tool })),
        Err(e) => error_response(e),
    }
}
