//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/poems", get(http::http_get_poems))
        .route("/api/v1/leaderboard", get(http::http_get_leaderboard))
        .route("/api/v1/sessions", post(http::http_create_session))
        .route(
            "/api/v1/sessions/:id",
            get(http::http_get_session).delete(http::http_delete_session),
        )
        .route("/api/v1/sessions/:id/start", post(http::http_start))
        .route("/api/v1/sessions/:id/select", post(http::http_select))
        .route("/api/v1/sessions/:id/acknowledge", post(http::http_acknowledge))
        .route("/api/v1/sessions/:id/dismiss", post(http::http_dismiss))
        .route("/api/v1/sessions/:id/restart", post(http::http_restart))
        .route("/api/v1/sessions/:id/reset", post(http::http_reset))
        .route("/api/v1/sessions/:id/feedback", post(http::http_feedback))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{FeedbackConfig, QuizConfig, StorageSettings};
    use crate::corpus::fixture_repo;
    use crate::leaderboard::MemoryLeaderboard;

    fn app(data_dir: &std::path::Path) -> (Router, Arc<AppState>) {
        let config = QuizConfig {
            storage: StorageSettings { data_dir: data_dir.to_path_buf() },
            feedback: Some(FeedbackConfig {
                url: String::new(),
                anon_key: String::new(),
                table_name: "game_feedback".into(),
                simulation_delay_ms: 0,
            }),
            ..QuizConfig::default()
        };
        let state = Arc::new(AppState::from_parts(config, fixture_repo(), Arc::new(MemoryLeaderboard::default())));
        (build_router(state.clone()), state)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).expect("request")).await.expect("response");
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json body") };
        (status, value)
    }

    #[tokio::test]
    async fn health_and_leaderboard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(dir.path());
        let (status, body) = call(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));

        let (status, body) = call(&app, Method::GET, "/api/v1/leaderboard?difficulty=advanced", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["entries"][0]["playTime"], "8分45秒");

        let (status, _) = call(&app, Method::GET, "/api/v1/leaderboard?difficulty=expert", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn poems_by_difficulty_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(dir.path());
        let (_, body) = call(&app, Method::GET, "/api/v1/poems?difficulty=beginner", None).await;
        assert_eq!(body["poems"].as_array().map(Vec::len), Some(3));
        let first = &body["poems"][0];
        assert!(first.get("content").is_none());
        assert_eq!(first["lineCount"], 4);
        let (_, body) = call(&app, Method::GET, "/api/v1/poems?difficulty=nope", None).await;
        assert_eq!(body["poems"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn session_flow_over_http() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, state) = app(dir.path());
        let (status, body) = call(&app, Method::POST, "/api/v1/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["phase"], "idle");
        let id = body["sessionId"].as_str().expect("session id").to_string();

        let (_, body) =
            call(&app, Method::POST, &format!("/api/v1/sessions/{id}/start"), Some(json!({ "difficulty": "beginner" }))).await;
        assert_eq!(body["phase"], "presenting");
        assert_eq!(body["currentLevel"], 1);
        assert!(body["question"].get("correctLine").is_none());
        assert!(body.get("feedback").is_none());

        // The answer is only known server-side.
        let uuid = id.parse().expect("uuid");
        let handle = state.get_session(uuid).await.expect("session");
        let line = handle.lock().await.game.phase.question().expect("question").correct_line.clone();

        let (_, body) = call(&app, Method::POST, &format!("/api/v1/sessions/{id}/select"), Some(json!({ "line": line }))).await;
        assert_eq!(body["phase"], "correct_feedback");
        assert_eq!(body["score"], 10);
        assert_eq!(body["feedback"]["correctLine"], line);

        let (_, body) = call(&app, Method::POST, &format!("/api/v1/sessions/{id}/acknowledge"), None).await;
        assert_eq!(body["currentLevel"], 2);

        let (_, body) = call(&app, Method::POST, &format!("/api/v1/sessions/{id}/select"), Some(json!({ "line": "不在选项里" }))).await;
        assert_eq!(body["phase"], "presenting");
        assert!(body["notice"].is_string());

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/sessions/{id}/feedback"),
            Some(json!({ "userFeedback": "很有意思" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["mode"], "simulation");

        let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::GET, &format!("/api/v1/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_feedback_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(dir.path());
        let (_, body) = call(&app, Method::POST, "/api/v1/sessions", None).await;
        let id = body["sessionId"].as_str().expect("session id").to_string();
        let (status, _) =
            call(&app, Method::POST, &format!("/api/v1/sessions/{id}/feedback"), Some(json!({ "userFeedback": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
