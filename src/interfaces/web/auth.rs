use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::AppState;

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let any_tokens_exist = match state.store.has_any_api_tokens().await {
        Ok(found) => found,
        Err(e) => {
            warn!("Token lookup failed: {}", e);
            true
        }
    };

    // No tokens configured: open access only on loopback.
    if !any_tokens_exist {
        if state.is_loopback() {
            return next.run(req).await;
        }
        return unauthorized(
            "No API tokens configured. Create one with `foreman token create <name>` before exposing the API on a non-loopback address.",
        );
    }

    let Some(raw_token) = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
    else {
        return unauthorized("Missing or invalid Authorization header. Use: Bearer <token>");
    };

    if state
        .store
        .validate_api_token(&raw_token)
        .await
        .unwrap_or(false)
    {
        next.run(req).await
    } else {
        unauthorized("Invalid or unauthorized API token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::web::testing;
    use axum::{Router, middleware, routing::get};
    use serde_json::json;
    use tower::util::ServiceExt;

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route("/api/ping", get(|| async { Json(json!({ "ok": true })) }))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                super::require_auth,
            ))
            .with_state(state)
    }

    async fn ping_status(app: Router, headers: Vec<(&str, String)>) -> StatusCode {
        let mut builder = Request::builder().uri("/api/ping");
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let req = builder.body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn no_tokens_on_loopback_allows_request() {
        let (state, _tmp) = testing::state("127.0.0.1").await;
        let status = ping_status(protected_app(state), vec![]).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn no_tokens_on_non_loopback_rejects_request() {
        let (state, _tmp) = testing::state("0.0.0.0").await;
        let status = ping_status(protected_app(state), vec![]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_present_requires_authorization_header() {
        let (state, _tmp) = testing::state("127.0.0.1").await;
        state.store.create_api_token("ci").await.unwrap();
        let status = ping_status(protected_app(state), vec![]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_bearer_token_is_accepted_and_wrong_one_is_not() {
        let (state, _tmp) = testing::state("0.0.0.0").await;
        let (raw, _) = state.store.create_api_token("ci").await.unwrap();
        let app = protected_app(state);

        let ok = ping_status(app.clone(), vec![("authorization", format!("Bearer {}", raw))]).await;
        assert_eq!(ok, StatusCode::OK);

        let bad = ping_status(app, vec![("authorization", "Bearer nope".to_string())]).await;
        assert_eq!(bad, StatusCode::UNAUTHORIZED);
    }
}
