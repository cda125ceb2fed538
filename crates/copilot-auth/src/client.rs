//! Management API calls for the Copilot device flow
//!
//! Each call is a single round-trip through the injected `Transport`.
//! Responses are deserialized into typed structs; anything the server sends
//! that does not fit becomes `Error::InvalidResponse`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use transport::Transport;

use crate::constants::DEFAULT_BASE_PATH;
use crate::error::{Error, Result};

/// Response from `POST {base}/start`.
///
/// `expires_in` is a delta in seconds from the response time. `interval`
/// is the minimum poll spacing the server asks for; absent or zero means
/// `DEFAULT_POLL_INTERVAL`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Status reported by a single poll.
///
/// Statuses this client does not know deserialize to `Unknown` and are
/// treated like `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Pending,
    Authorized,
    Denied,
    Expired,
    Error,
    #[serde(other)]
    Unknown,
}

/// Response from `GET {base}/poll`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollResponse {
    pub status: PollState,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response from `GET {base}/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(default)]
    pub username: Option<String>,
}

/// Thin client over the device flow endpoints.
#[derive(Clone)]
pub struct DeviceFlowClient {
    transport: Arc<dyn Transport>,
    base_path: String,
}

impl DeviceFlowClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_path: DEFAULT_BASE_PATH.to_string(),
        }
    }

    /// Use a base path other than `/oauth/copilot`.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    fn path(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_path)
    }

    /// Request a new device code.
    pub async fn start_device_flow(&self) -> Result<DeviceCodeResponse> {
        let body = self.transport.post(&self.path("start"), None).await?;
        decode("start", body)
    }

    /// Ask whether the user has acted on `device_code` yet.
    pub async fn poll_status(&self, device_code: &str) -> Result<PollResponse> {
        let body = self
            .transport
            .get(&self.path("poll"), &[("device_code", device_code)])
            .await?;
        decode("poll", body)
    }

    /// Current connection status of the Copilot account.
    pub async fn get_status(&self) -> Result<ConnectionStatus> {
        let body = self.transport.get(&self.path("status"), &[]).await?;
        decode("status", body)
    }

    /// Revoke the stored Copilot credential.
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.delete(&self.path("revoke")).await?;
        Ok(())
    }

    /// Ask the server to refresh the stored Copilot token.
    ///
    /// Returns whatever the server sends back; the shape is not fixed.
    pub async fn refresh_token(&self) -> Result<Value> {
        Ok(self.transport.post(&self.path("refresh"), None).await?)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::InvalidResponse {
        endpoint,
        message: e.to_string(),
    })
}
