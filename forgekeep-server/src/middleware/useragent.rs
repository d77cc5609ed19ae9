//! Rejects API requests that carry no `User-Agent` header.

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
struct UserAgentNotSetResponse {
    message: String,
    errors: Vec<String>,
}

/// Middleware requiring a non-empty `User-Agent` on every request.
pub async fn require_user_agent(req: Request, next: Next) -> Response {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if user_agent.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(UserAgentNotSetResponse {
                message: "User-Agent header is missing".to_string(),
                errors: vec!["User-Agent must have some value".to_string()],
            }),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use axum_test::TestServer;

    fn test_app() -> TestServer {
        let app = Router::new()
            .route("/v3/modules", get(|| async { "[]" }))
            .layer(axum::middleware::from_fn(require_user_agent));
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_missing_user_agent_rejected() {
        let server = test_app();
        let response = server.get("/v3/modules").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["message"], "User-Agent header is missing");
    }

    #[tokio::test]
    async fn test_user_agent_accepted() {
        let server = test_app();
        let response = server
            .get("/v3/modules")
            .add_header(header::USER_AGENT, "forge-client/1.0")
            .await;
        response.assert_status_ok();
    }
}
