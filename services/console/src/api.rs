//! Dashboard HTTP API
//!
//! JSON endpoints over the device flow and the config store. Both engines
//! own their state; handlers only trigger operations and render snapshots.
//!
//! Endpoints:
//! - GET    /api/copilot/auth          current device-flow state
//! - POST   /api/copilot/auth/start    request a device code and start polling
//! - POST   /api/copilot/auth/stop     stop polling, keep the code on screen
//! - POST   /api/copilot/auth/reset    back to idle
//! - POST   /api/copilot/auth/check    reconcile with the server's connection status
//! - POST   /api/copilot/auth/refresh  ask the server to refresh the Copilot token
//! - DELETE /api/copilot/auth          revoke the stored credential
//! - GET    /api/config                whole document, or `?section=` for one section
//! - PUT    /api/config?section=       local edit of one section
//! - GET    /api/config/state          loading / error / last document
//! - GET    /api/config/cache          cache validity for the document or `?section=`
//! - DELETE /api/config/cache          drop the cache, or one `?section=`

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use copilot_auth::{AuthStatus, DeviceAuthorization};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, Result};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/copilot/auth", get(auth_state).delete(disconnect))
        .route("/api/copilot/auth/start", post(start_flow))
        .route("/api/copilot/auth/stop", post(stop_polling))
        .route("/api/copilot/auth/reset", post(reset_flow))
        .route("/api/copilot/auth/check", post(check_status))
        .route("/api/copilot/auth/refresh", post(refresh_token))
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/config/state", get(config_state))
        .route("/api/config/cache", get(cache_status).delete(clear_cache))
}

/// Device-flow state as the dashboard sees it. The device code itself never
/// leaves the process.
#[derive(Debug, Serialize)]
struct AuthView {
    status: AuthStatus,
    user_code: Option<String>,
    verification_uri: Option<String>,
    expires_in_secs: Option<u64>,
    poll_interval_secs: u64,
    username: Option<String>,
    error: Option<String>,
    is_polling: bool,
}

impl AuthView {
    fn new(auth: DeviceAuthorization, now: Instant) -> Self {
        Self {
            status: auth.status,
            expires_in_secs: auth.expires_in(now).map(|d| d.as_secs()),
            poll_interval_secs: auth.poll_interval.as_secs(),
            user_code: auth.user_code,
            verification_uri: auth.verification_uri,
            username: auth.username,
            error: auth.error,
            is_polling: auth.is_polling,
        }
    }
}

fn auth_view(state: &AppState) -> Json<AuthView> {
    Json(AuthView::new(state.flow.snapshot(), Instant::now()))
}

async fn auth_state(State(state): State<AppState>) -> Json<AuthView> {
    auth_view(&state)
}

async fn start_flow(State(state): State<AppState>) -> Json<AuthView> {
    info!("device flow start requested");
    state.flow.start_device_flow().await;
    auth_view(&state)
}

async fn stop_polling(State(state): State<AppState>) -> Json<AuthView> {
    state.flow.stop_polling().await;
    auth_view(&state)
}

async fn reset_flow(State(state): State<AppState>) -> Json<AuthView> {
    state.flow.reset().await;
    auth_view(&state)
}

async fn check_status(State(state): State<AppState>) -> Json<AuthView> {
    state.flow.check_status().await;
    auth_view(&state)
}

async fn refresh_token(State(state): State<AppState>) -> Result<Json<Value>> {
    Ok(Json(state.flow.refresh_token().await?))
}

async fn disconnect(State(state): State<AppState>) -> Result<Json<AuthView>> {
    info!("copilot disconnect requested");
    state.flow.disconnect().await?;
    Ok(auth_view(&state))
}

#[derive(Debug, Deserialize)]
struct ConfigQuery {
    section: Option<String>,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Deserialize)]
struct SectionQuery {
    section: Option<String>,
}

async fn get_config(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> Result<Response> {
    match query.section {
        Some(section) => {
            let value = state.config.fetch_section(&section, query.refresh).await?;
            Ok(Json(json!({ "section": section, "value": value })).into_response())
        }
        None => {
            let config = state.config.fetch_config(query.refresh).await?;
            Ok(Json(config).into_response())
        }
    }
}

async fn update_config(
    State(state): State<AppState>,
    Query(query): Query<SectionQuery>,
    Json(value): Json<Value>,
) -> Result<Response> {
    let section = query
        .section
        .ok_or_else(|| ApiError::BadRequest("section query parameter is required".into()))?;
    state.config.update_config_value(&section, value).await?;
    info!(section, "config section edited");
    Ok(Json(state.config.snapshot()).into_response())
}

async fn config_state(State(state): State<AppState>) -> Response {
    Json(state.config.snapshot()).into_response()
}

async fn cache_status(
    State(state): State<AppState>,
    Query(query): Query<SectionQuery>,
) -> Json<Value> {
    let section = query.section.as_deref();
    let valid = state.config.is_cache_valid(section).await;
    Json(json!({
        "section": section,
        "valid": valid,
        "ttl_secs": state.config.ttl().await.as_secs(),
    }))
}

async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<SectionQuery>,
) -> StatusCode {
    state.config.clear_cache(query.section.as_deref()).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use transport::TransportError;
    use transport::mock::MockTransport;

    fn app(mock: &Arc<MockTransport>) -> Router {
        let state = AppState::for_tests(mock.clone(), Duration::from_secs(30));
        routes().with_state(state)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn device_code() -> Value {
        json!({
            "device_code": "dc_secret",
            "user_code": "WDJB-MJHT",
            "verification_uri": "https://github.com/login/device",
            "expires_in": 900,
            "interval": 5
        })
    }

    #[tokio::test]
    async fn idle_state_before_any_flow() {
        let mock = Arc::new(MockTransport::new());
        let (status, body) = send(app(&mock), "GET", "/api/copilot/auth", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");
        assert_eq!(body["is_polling"], false);
        assert_eq!(body["user_code"], Value::Null);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn start_returns_pending_code_without_device_code() {
        let mock = Arc::new(MockTransport::new());
        mock.reply("POST", "/oauth/copilot/start", Ok(device_code()))
            .reply("GET", "/oauth/copilot/poll", Ok(json!({"status": "pending"})));
        let app = app(&mock);

        let (status, body) = send(app.clone(), "POST", "/api/copilot/auth/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["user_code"], "WDJB-MJHT");
        assert_eq!(body["verification_uri"], "https://github.com/login/device");
        assert_eq!(body["poll_interval_secs"], 5);
        assert_eq!(body["is_polling"], true);
        assert!(body["expires_in_secs"].as_u64().unwrap() <= 900);
        assert!(!body.to_string().contains("dc_secret"));

        let (_, body) = send(app, "POST", "/api/copilot/auth/stop", None).await;
        assert_eq!(body["status"], "pending");
        assert_eq!(body["is_polling"], false);
    }

    #[tokio::test]
    async fn start_failure_is_reported_in_state() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "POST",
            "/oauth/copilot/start",
            Err(TransportError::Server {
                status: 503,
                message: "copilot oauth disabled".into(),
            }),
        );

        let (status, body) = send(app(&mock), "POST", "/api/copilot/auth/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "copilot oauth disabled");
    }

    #[tokio::test]
    async fn check_marks_connected_account_authorized() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "GET",
            "/oauth/copilot/status",
            Ok(json!({"connected": true, "username": "octocat"})),
        );

        let (status, body) = send(app(&mock), "POST", "/api/copilot/auth/check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "authorized");
        assert_eq!(body["username"], "octocat");
    }

    #[tokio::test]
    async fn disconnect_resets_to_idle() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "GET",
            "/oauth/copilot/status",
            Ok(json!({"connected": true, "username": "octocat"})),
        )
        .reply("DELETE", "/oauth/copilot/revoke", Ok(Value::Null));
        let app = app(&mock);

        send(app.clone(), "POST", "/api/copilot/auth/check", None).await;
        let (status, body) = send(app, "DELETE", "/api/copilot/auth", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");
        assert_eq!(body["username"], Value::Null);
    }

    #[tokio::test]
    async fn disconnect_failure_is_bad_gateway() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "DELETE",
            "/oauth/copilot/revoke",
            Err(TransportError::Server {
                status: 500,
                message: "revoke failed upstream".into(),
            }),
        );
        let app = app(&mock);

        let (status, body) = send(app.clone(), "DELETE", "/api/copilot/auth", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["type"], "upstream_error");
        assert_eq!(body["error"]["message"], "revoke failed upstream");

        let (_, state) = send(app, "GET", "/api/copilot/auth", None).await;
        assert_eq!(state["error"], "revoke failed upstream");
    }

    #[tokio::test]
    async fn refresh_passes_server_body_through() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "POST",
            "/oauth/copilot/refresh",
            Ok(json!({"refreshed": true, "expires_at": 1700000000})),
        );

        let (status, body) = send(app(&mock), "POST", "/api/copilot/auth/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refreshed"], true);
    }

    #[tokio::test]
    async fn reset_clears_error() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "POST",
            "/oauth/copilot/start",
            Err(TransportError::Network("connection refused".into())),
        );
        let app = app(&mock);

        send(app.clone(), "POST", "/api/copilot/auth/start", None).await;
        let (_, body) = send(app, "POST", "/api/copilot/auth/reset", None).await;
        assert_eq!(body["status"], "idle");
        assert_eq!(body["error"], Value::Null);
    }

    #[tokio::test]
    async fn config_document_and_section_share_one_fetch() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "GET",
            "/config",
            Ok(json!({"debug": true, "port": 8317, "routing": {"strategy": "round-robin"}})),
        );
        let app = app(&mock);

        let (status, body) = send(app.clone(), "GET", "/api/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["port"], 8317);
        assert_eq!(body["routingStrategy"], "round-robin");

        let (status, body) = send(
            app.clone(),
            "GET",
            "/api/config?section=routing/strategy",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["section"], "routing/strategy");
        assert_eq!(body["value"], "round-robin");
        assert_eq!(mock.calls_to("GET", "/config"), 1);

        send(app, "GET", "/api/config?refresh=true", None).await;
        assert_eq!(mock.calls_to("GET", "/config"), 2);
    }

    #[tokio::test]
    async fn missing_section_is_null_value() {
        let mock = Arc::new(MockTransport::new());
        mock.reply("GET", "/config", Ok(json!({"debug": false})));

        let (status, body) = send(app(&mock), "GET", "/api/config?section=tls-cert", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], Value::Null);
    }

    #[tokio::test]
    async fn fetch_failure_is_bad_gateway_and_recorded() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "GET",
            "/config",
            Err(TransportError::Server {
                status: 401,
                message: "invalid management key".into(),
            }),
        );
        let app = app(&mock);

        let (status, body) = send(app.clone(), "GET", "/api/config", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["message"], "invalid management key");

        let (_, view) = send(app, "GET", "/api/config/state", None).await;
        assert_eq!(view["loading"], false);
        assert_eq!(view["error"], "invalid management key");
        assert_eq!(view["config"], Value::Null);
    }

    #[tokio::test]
    async fn update_section_edits_live_config() {
        let mock = Arc::new(MockTransport::new());
        mock.reply("GET", "/config", Ok(json!({"debug": false, "port": 8317})));
        let app = app(&mock);

        send(app.clone(), "GET", "/api/config", None).await;
        let (status, view) = send(
            app.clone(),
            "PUT",
            "/api/config?section=debug",
            Some(json!(true)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["config"]["debug"], true);
        assert_eq!(view["config"]["port"], 8317);

        let (_, cache) = send(app, "GET", "/api/config/cache?section=debug", None).await;
        assert_eq!(cache["valid"], false);
    }

    #[tokio::test]
    async fn update_with_wrong_shape_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let (status, body) = send(
            app(&mock),
            "PUT",
            "/api/config?section=port",
            Some(json!("not-a-port")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_value");
    }

    #[tokio::test]
    async fn update_without_section_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let (status, body) = send(app(&mock), "PUT", "/api/config", Some(json!(1))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn cache_status_and_clear() {
        let mock = Arc::new(MockTransport::new());
        mock.reply("GET", "/config", Ok(json!({"host": "0.0.0.0"})));
        let app = app(&mock);

        let (_, cache) = send(app.clone(), "GET", "/api/config/cache", None).await;
        assert_eq!(cache["valid"], false);
        assert_eq!(cache["ttl_secs"], 30);

        send(app.clone(), "GET", "/api/config", None).await;
        let (_, cache) = send(app.clone(), "GET", "/api/config/cache", None).await;
        assert_eq!(cache["valid"], true);
        assert_eq!(cache["section"], Value::Null);

        let (status, _) = send(app.clone(), "DELETE", "/api/config/cache", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, cache) = send(app.clone(), "GET", "/api/config/cache", None).await;
        assert_eq!(cache["valid"], false);
        let (_, view) = send(app, "GET", "/api/config/state", None).await;
        assert_eq!(view["config"], Value::Null);
    }
}
