use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{automations, executions, tools};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/automations", get(automations::list_automations))
        .route(
            "/api/automations/rediscover",
            post(automations::rediscover),
        )
        .route(
            "/api/automations/{category}/{slug}",
            get(automations::get_automation).patch(automations::update_automation),
        )
        .route(
            "/api/automations/{category}/{slug}/trigger",
            post(automations::trigger_automation),
        )
        .route(
            "/api/automations/{category}/{slug}/executions",
            get(automations::list_automation_executions),
        )
        .route("/api/executions/{id}", get(executions::get_execution))
        .route(
            "/api/executions/{id}/steps",
            get(executions::list_steps).post(executions::record_step),
        )
        .route(
            "/api/tools",
            get(tools::list_tools).post(tools::create_tool),
        )
        .route("/api/tools/{id}", get(tools::get_tool))
        .route(
            "/api/tools/{id}/queue/{stage}",
            post(tools::queue_stage),
        )
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::web::testing;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let (state, _tmp) = testing::state("127.0.0.1").await;
        let app = build_api_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/automations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    }

    #[tokio::test]
    async fn trigger_then_read_history_and_steps() {
        let (state, _tmp) = testing::state("127.0.0.1").await;
        let app = build_api_router(state);

        let (status, body) = send(
            &app,
            "POST",
            "/api/automations/workers/echo/trigger",
            Some(json!({ "target": "tool-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["metadata"]["trigger"], "api");
        assert_eq!(body["metadata"]["target"], "tool-1");
        let execution_id = body["execution_id"].as_str().unwrap().to_string();

        let (status, body) =
            send(&app, "POST", "/api/automations/workers/echo/trigger", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["metadata"]["target"].is_null());

        let (_, body) = send(&app, "GET", "/api/automations/workers/echo/executions", None).await;
        assert_eq!(body["executions"].as_array().unwrap().len(), 2);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/executions/{}/steps", execution_id),
            Some(json!({
                "step_name": "publish",
                "status": "completed",
                "metadata": {"url": "x"},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let steps_uri = format!("/api/executions/{}/steps", execution_id);
        let (_, body) = send(&app, "GET", &steps_uri, None).await;
        let names: Vec<&str> = body["steps"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["step_name"].as_str())
            .collect();
        assert_eq!(names.last(), Some(&"remote:publish"));

        let (_, body) = send(&app, "GET", &format!("/api/executions/{}", execution_id), None).await;
        assert_eq!(body["execution"]["status"], "success");
    }

    #[tokio::test]
    async fn unknown_ids_are_404_and_bad_input_is_400() {
        let (state, _tmp) = testing::state("127.0.0.1").await;
        let app = build_api_router(state);

        let (status, _) = send(&app, "POST", "/api/automations/workers/ghost/trigger", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", "/api/executions/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &app,
            "POST",
            "/api/executions/nope/steps",
            Some(json!({ "step_name": "x", "status": "completed" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "PATCH",
            "/api/automations/workers/echo",
            Some(json!({ "schedule": "whenever" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) =
            send(&app, "PATCH", "/api/automations/workers/echo", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_updates_automation() {
        let (state, _tmp) = testing::state("127.0.0.1").await;
        let app = build_api_router(state);
        let (status, body) = send(
            &app,
            "PATCH",
            "/api/automations/workers/echo",
            Some(json!({ "enabled": false, "tags": ["nightly"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["automation"]["enabled"], false);
        assert_eq!(body["automation"]["tags"], json!(["nightly"]));
    }

    #[tokio::test]
    async fn tools_are_created_queued_and_requeued() {
        let (state, _tmp) = testing::state("127.0.0.1").await;
        let app = build_api_router(state);

        let (status, _) = send(
            &app,
            "POST",
            "/api/tools",
            Some(json!({ "name": "Acme", "website": "not a url" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            "/api/tools",
            Some(json!({ "name": "Acme", "website": "https://acme.dev" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["tool"]["research_status"], "queued");
        let id = body["tool"]["id"].as_str().unwrap().to_string();

        let queue = |stage: &str| format!("/api/tools/{}/queue/{}", id, stage);
        let (status, _) = send(&app, "POST", &queue("analysis"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, "POST", &queue("publishing"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(&app, "POST", &queue("directory"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tool"]["directory_status"], "queued");

        let (_, body) = send(&app, "GET", &format!("/api/tools/{}", id), None).await;
        assert_eq!(body["tool"]["name"], "Acme");
        assert!(body["draft"].is_null());
        let (status, _) = send(&app, "GET", "/api/tools/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, "GET", "/api/tools", None).await;
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_loopback_without_tokens_is_rejected() {
        let (state, _tmp) = testing::state("0.0.0.0").await;
        let app = build_api_router(state);
        let (status, _) = send(&app, "GET", "/api/automations", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
