//! Typed view of the gateway config document
//!
//! `SECTIONS` maps every known section key to its location in the raw
//! document and to the typed field on `ProxyConfig`. Parsing, section reads
//! and local edits all go through the table; nothing here branches on
//! individual keys.
//!
//! `raw` is authoritative. Section reads return what the server sent; the
//! typed fields are a projection that is `None` wherever the raw value does
//! not fit.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// `quota-exceeded` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuotaExceededConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_project: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_preview_model: Option<bool>,
    /// Keys this version does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The gateway's config document.
///
/// Typed fields are `None` when the server omitted the section or sent a
/// value of the wrong shape. `raw` always holds the document as received,
/// plus local edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub debug: Option<bool>,
    pub proxy_url: Option<String>,
    pub request_retry: Option<u64>,
    pub quota_exceeded: Option<QuotaExceededConfig>,
    pub usage_statistics_enabled: Option<bool>,
    pub request_log: Option<bool>,
    pub logging_to_file: Option<bool>,
    pub logs_max_total_size_mb: Option<u64>,
    pub ws_auth: Option<bool>,
    pub force_model_prefix: Option<bool>,
    pub routing_strategy: Option<String>,
    pub api_keys: Option<Vec<String>>,
    pub ampcode: Option<Value>,
    pub gemini_api_keys: Option<Vec<Value>>,
    pub codex_api_keys: Option<Vec<Value>>,
    pub claude_api_keys: Option<Vec<Value>>,
    pub vertex_api_keys: Option<Vec<Value>>,
    pub openai_compatibility: Option<Vec<Value>>,
    pub oauth_excluded_models: Option<BTreeMap<String, Vec<String>>>,

    // Server
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_enabled: Option<bool>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub commercial_mode: Option<bool>,

    // Management
    pub allow_remote: Option<bool>,
    pub disable_control_panel: Option<bool>,
    pub panel_github_repository: Option<String>,

    // Auth
    pub auth_dir: Option<String>,
    pub incognito_browser: Option<bool>,

    // Logging
    pub error_logs_max_files: Option<u64>,

    // Performance
    pub max_retry_interval: Option<u64>,
    pub nonstream_keepalive_interval: Option<u64>,
    pub streaming_keepalive_seconds: Option<u64>,
    pub streaming_bootstrap_retries: Option<u64>,

    pub codex_instructions_enabled: Option<bool>,

    pub raw: Map<String, Value>,
}

type Getter = fn(&ProxyConfig) -> Option<Value>;
type Setter = fn(&mut ProxyConfig, Value) -> serde_json::Result<()>;

/// Binds a section key to its raw location and typed field.
pub struct SectionBinding {
    pub key: &'static str,
    /// JSON pointer into the raw document
    pub pointer: &'static str,
    get: Getter,
    set: Setter,
}

impl SectionBinding {
    /// Typed value of this section, re-encoded as JSON.
    pub fn get(&self, config: &ProxyConfig) -> Option<Value> {
        (self.get)(config)
    }

    /// Decode `value` into the typed field. `null` clears it.
    pub fn set(&self, config: &mut ProxyConfig, value: Value) -> serde_json::Result<()> {
        (self.set)(config, value)
    }
}

impl std::fmt::Debug for SectionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionBinding")
            .field("key", &self.key)
            .field("pointer", &self.pointer)
            .finish()
    }
}

macro_rules! binding {
    (@build $key:expr, $pointer:expr, $field:ident) => {
        SectionBinding {
            key: $key,
            pointer: $pointer,
            get: |config| {
                config
                    .$field
                    .as_ref()
                    .and_then(|v| serde_json::to_value(v).ok())
            },
            set: |config, value| {
                config.$field = if value.is_null() {
                    None
                } else {
                    Some(decode(value)?)
                };
                Ok(())
            },
        }
    };
    ($key:literal, $pointer:literal, $field:ident) => {
        binding!(@build $key, $pointer, $field)
    };
    ($key:literal, $field:ident) => {
        binding!(@build $key, concat!("/", $key), $field)
    };
}

/// Every section the config engine knows by name.
pub static SECTIONS: &[SectionBinding] = &[
    binding!("debug", debug),
    binding!("proxy-url", proxy_url),
    binding!("request-retry", request_retry),
    binding!("quota-exceeded", quota_exceeded),
    binding!("usage-statistics-enabled", usage_statistics_enabled),
    binding!("request-log", request_log),
    binding!("logging-to-file", logging_to_file),
    binding!("logs-max-total-size-mb", logs_max_total_size_mb),
    binding!("ws-auth", ws_auth),
    binding!("force-model-prefix", force_model_prefix),
    binding!("routing/strategy", "/routing/strategy", routing_strategy),
    binding!("api-keys", api_keys),
    binding!("ampcode", ampcode),
    binding!("gemini-api-key", gemini_api_keys),
    binding!("codex-api-key", codex_api_keys),
    binding!("claude-api-key", claude_api_keys),
    binding!("vertex-api-key", vertex_api_keys),
    binding!("openai-compatibility", openai_compatibility),
    binding!("oauth-excluded-models", oauth_excluded_models),
    binding!("host", host),
    binding!("port", port),
    binding!("tls-enabled", tls_enabled),
    binding!("tls-cert", tls_cert),
    binding!("tls-key", tls_key),
    binding!("commercial-mode", commercial_mode),
    binding!("allow-remote", allow_remote),
    binding!("disable-control-panel", disable_control_panel),
    binding!("panel-github-repository", panel_github_repository),
    binding!("auth-dir", auth_dir),
    binding!("incognito-browser", incognito_browser),
    binding!("error-logs-max-files", error_logs_max_files),
    binding!("max-retry-interval", max_retry_interval),
    binding!("nonstream-keepalive-interval", nonstream_keepalive_interval),
    binding!("streaming-keepalive-seconds", streaming_keepalive_seconds),
    binding!("streaming-bootstrap-retries", streaming_bootstrap_retries),
    binding!("codex-instructions-enabled", codex_instructions_enabled),
];

/// Look up the binding for a known section key.
pub fn binding(key: &str) -> Option<&'static SectionBinding> {
    SECTIONS.iter().find(|b| b.key == key)
}

/// Known section keys in table order.
pub fn section_keys() -> impl Iterator<Item = &'static str> {
    SECTIONS.iter().map(|b| b.key)
}

impl ProxyConfig {
    /// Build the typed view of a `/config` response.
    ///
    /// The document must be a JSON object. Sections with an unexpected shape
    /// are logged and left unset.
    pub fn from_document(document: Value) -> Result<Self> {
        let raw = match document {
            Value::Object(raw) => raw,
            other => {
                return Err(Error::InvalidDocument(format!(
                    "expected a JSON object, got {}",
                    kind(&other)
                )));
            }
        };

        let mut config = ProxyConfig::default();
        for binding in SECTIONS {
            let Some(value) = lookup(&raw, binding.pointer) else {
                continue;
            };
            if let Err(e) = binding.set(&mut config, value.clone()) {
                warn!(section = binding.key, error = %e, "config section has unexpected shape, leaving it unset");
            }
        }
        config.raw = raw;
        Ok(config)
    }

    /// Value of `section` as held in `raw`: at the binding's pointer for known
    /// sections, `raw[section]` for everything else. `null` reads as absent.
    pub fn section_value(&self, section: &str) -> Option<Value> {
        let value = match binding(section) {
            Some(binding) => lookup(&self.raw, binding.pointer),
            None => self.raw.get(section),
        };
        value.filter(|v| !v.is_null()).cloned()
    }

    /// Copy of this config with `section` replaced by `value`.
    ///
    /// Known sections are decoded into their typed field first; a value of
    /// the wrong shape is rejected and nothing is written.
    pub fn with_section(&self, section: &str, value: Value) -> Result<Self> {
        let mut next = self.clone();
        match binding(section) {
            Some(binding) => {
                binding
                    .set(&mut next, value.clone())
                    .map_err(|e| Error::InvalidValue {
                        section: section.to_string(),
                        message: e.to_string(),
                    })?;
                write_pointer(&mut next.raw, binding.pointer, value);
            }
            None => {
                next.raw.insert(section.to_string(), value);
            }
        }
        Ok(next)
    }
}

/// Decode a section value, accepting integral floats (`3.0`) where an
/// integer is expected.
fn decode<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Ok(decoded),
        Err(e) => match integral(&value) {
            Some(whole) => serde_json::from_value(whole),
            None => Err(e),
        },
    }
}

fn integral(value: &Value) -> Option<Value> {
    let f = value.as_f64().filter(|f| value.is_f64() && f.fract() == 0.0)?;
    if f >= 0.0 && f <= u64::MAX as f64 {
        Some(Value::from(f as u64))
    } else if f < 0.0 && f >= i64::MIN as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn lookup<'a>(raw: &'a Map<String, Value>, pointer: &str) -> Option<&'a Value> {
    let path = pointer.strip_prefix('/')?;
    match path.split_once('/') {
        Some((head, rest)) => raw.get(head)?.pointer(&format!("/{rest}")),
        None => raw.get(path),
    }
}

fn write_pointer(raw: &mut Map<String, Value>, pointer: &str, value: Value) {
    let mut tokens: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let Some(last) = tokens.pop() else {
        return;
    };

    let mut map = raw;
    for token in tokens {
        let slot = map
            .entry(token.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        map = match slot {
            Value::Object(inner) => inner,
            _ => return,
        };
    }
    map.insert(last.to_string(), value);
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
