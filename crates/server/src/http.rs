//! HTTP endpoints
//!
//! Session creation, the WebSocket upgrade route, and health.

use axum::{
    extract::{Json, Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::WsHandler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_origins);

    Router::new()
        .route("/session", post(create_session))
        .route("/ws/:session_id", get(ws_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins; empty stays same-origin
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "ignoring invalid cors origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST])
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    /// Explicit client identity token; falls back to forwarding headers
    identity: Option<String>,
}

/// Create a session and hand back its WebSocket URL
///
/// The rate gatekeeper is consulted here, at the connection boundary, with
/// the same identity window used for turn admission.
async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let identity = resolve_identity(&headers, body.as_deref());

    if let Err(denied) = state.gatekeeper.admit(&identity) {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "retry_after_ms": denied.retry_after.as_millis() as u64,
            })),
        ));
    }

    let profile = state.profiles.read_profile(&identity).await.map_err(|e| {
        tracing::warn!(identity = %identity, error = %e, "profile read failed");
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": "invalid_profile" })),
        )
    })?;

    let session = state.sessions.create(&identity, profile).map_err(|e| {
        tracing::warn!(error = %e, "session creation failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "capacity" })),
        )
    })?;

    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "websocket_url": format!("/ws/{}", session.id),
        "state": session.state().as_str(),
        "child_age": session.profile.child_age,
    })))
}

fn resolve_identity(headers: &HeaderMap, body: Option<&CreateSessionRequest>) -> String {
    if let Some(identity) = body.and_then(|b| b.identity.clone()) {
        return identity;
    }
    for header in ["x-client-token", "x-forwarded-for"] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    "anonymous".to_string()
}

/// Health check
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.count(),
    }))
}

/// WebSocket handler wrapper
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    WsHandler::handle(ws, State(state), Path(session_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::loopback_adapters;
    use crate::settings::Settings;

    #[test]
    fn test_router_creation() {
        let state = AppState::new(Settings::default(), loopback_adapters());
        let _ = create_router(state);
    }

    #[test]
    fn test_identity_resolution_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-token", HeaderValue::from_static("token-1"));

        let body = CreateSessionRequest {
            identity: Some("explicit".to_string()),
        };
        assert_eq!(resolve_identity(&headers, Some(&body)), "explicit");
        assert_eq!(resolve_identity(&headers, None), "token-1");
        assert_eq!(resolve_identity(&HeaderMap::new(), None), "anonymous");
    }
}
