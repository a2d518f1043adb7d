pub mod automations;
pub mod executions;
pub mod tools;

use axum::{Json, http::StatusCode};
use serde_json::{Value, json};

use crate::core::error::error_kind;

pub(crate) type ApiResponse = (StatusCode, Json<Value>);

pub(crate) fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

pub(crate) fn fail(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

/// Map an application error onto a status code by its pipeline kind.
pub(crate) fn error_response(err: anyhow::Error) -> ApiResponse {
    let status = match error_kind(&err) {
        "not_found" => StatusCode::NOT_FOUND,
        "precondition" | "configuration" | "parse" => StatusCode::BAD_REQUEST,
        "transient_fetch" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, err.to_string())
}
