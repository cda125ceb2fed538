//! API error responses
//!
//! Handler failures render as `{"error": {"type": ..., "message": ...}}` with
//! a status that says whose fault it was: 400 for a bad request, 502 when the
//! management API refused or was unreachable.

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] copilot_auth::Error),

    #[error(transparent)]
    Config(#[from] config_store::Error),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(config_store::Error::InvalidValue { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Config(config_store::Error::Aborted(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(copilot_auth::Error::Cancelled) => StatusCode::CONFLICT,
            ApiError::Auth(_) | ApiError::Config(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Config(config_store::Error::InvalidValue { .. }) => "invalid_value",
            ApiError::Config(config_store::Error::InvalidDocument(_)) => "invalid_document",
            ApiError::Config(config_store::Error::Aborted(_)) => "internal_error",
            ApiError::Auth(copilot_auth::Error::Cancelled) => "cancelled",
            ApiError::Auth(_) | ApiError::Config(_) => "upstream_error",
        }
    }

    /// Message shown to the operator; prefers the management API's own text.
    pub fn message(&self) -> String {
        match self {
            ApiError::Auth(e) => e.user_message("Management API request failed"),
            ApiError::Config(e) => e.user_message(),
            ApiError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
            }
        });
        (
            self.status(),
            [(CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use transport::TransportError;

    #[test]
    fn upstream_failures_map_to_bad_gateway() {
        let err = ApiError::from(copilot_auth::Error::Transport(TransportError::Server {
            status: 500,
            message: "token store unavailable".into(),
        }));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_type(), "upstream_error");
        assert_eq!(err.message(), "token store unavailable");

        let err = ApiError::from(config_store::Error::Transport(TransportError::Network(
            "connection refused".into(),
        )));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.message(), "connection refused");
    }

    #[test]
    fn invalid_value_is_a_client_error() {
        let err = ApiError::from(config_store::Error::InvalidValue {
            section: "port".into(),
            message: "expected u16".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_value");
        assert!(err.message().contains("port"));
    }

    #[test]
    fn empty_server_message_falls_back() {
        let err = ApiError::from(copilot_auth::Error::Transport(TransportError::Server {
            status: 502,
            message: String::new(),
        }));
        assert_eq!(err.message(), "Management API request failed");
    }

    #[tokio::test]
    async fn renders_json_error_body() {
        let response = ApiError::BadRequest("section is required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request");
        assert_eq!(json["error"]["message"], "section is required");
    }
}
