//! reqwest-backed transport
//!
//! Joins request paths onto the management base URL, attaches the management
//! key as a bearer token, and maps responses onto `TransportError`:
//! non-2xx becomes `Server` carrying the message from the error body, send
//! and read failures become `Network`, and an unparseable 2xx body becomes
//! `Decode`. Empty 2xx bodies (204 from revoke) resolve to `Value::Null`.

use std::time::Duration;

use common::Secret;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Result, Transport, TransportError, TransportFuture};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport for the management API.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    management_key: Option<Secret<String>>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            management_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Send `Authorization: Bearer <key>` on every request.
    pub fn with_management_key(mut self, key: Secret<String>) -> Self {
        self.management_key = Some(key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        method: &'static str,
        path: &str,
    ) -> Result<Value> {
        let mut request = request
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(key) = &self.management_key {
            request = request.bearer_auth(key.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(format!("{method} {path} failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(format!("reading {path} response: {e}")))?;

        if !status.is_success() {
            let message = error_message(status, &body);
            warn!(method, path, status = status.as_u16(), error = %message, "management API error");
            return Err(TransportError::Server {
                status: status.as_u16(),
                message,
            });
        }

        debug!(method, path, status = status.as_u16(), bytes = body.len(), "management API ok");

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body)
            .map_err(|e| TransportError::Decode(format!("{path} returned non-JSON body: {e}")))
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, path: &'a str, query: &'a [(&'a str, &'a str)]) -> TransportFuture<'a> {
        Box::pin(async move {
            let request = self.client.get(self.url(path)).query(query);
            self.send(request, "GET", path).await
        })
    }

    fn post<'a>(&'a self, path: &'a str, body: Option<&'a Value>) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut request = self.client.post(self.url(path));
            if let Some(body) = body {
                request = request.json(body);
            }
            self.send(request, "POST", path).await
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            let request = self.client.delete(self.url(path));
            self.send(request, "DELETE", path).await
        })
    }
}

/// Pick the most useful message from an error response body.
///
/// Looks for `message`, then a string `error`, then `error.message` in a JSON
/// body; falls back to the trimmed body text and finally the status reason.
pub(crate) fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        let candidates = [
            json.get("message"),
            json.get("error"),
            json.pointer("/error/message"),
        ];
        if let Some(text) = candidates
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find(|s| !s.trim().is_empty())
        {
            return text.to_string();
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}
