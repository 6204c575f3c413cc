//! Client configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientConfig::default()`]
//! 2. If a JSON file is given and exists, deep-merge its values over defaults
//! 3. Apply `FLOWLINK_*` environment variable overrides (highest priority)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Address;

/// Where to find the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Host to connect to (default `"127.0.0.1"`).
    pub host: String,
    /// Fallback port when the host application provides none (default `58996`).
    pub port: u16,
    /// WebSocket request path (default `"/ws"`).
    pub path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 58996,
            path: "/ws".into(),
        }
    }
}

impl BackendConfig {
    /// Backend address, preferring a port supplied by the host application
    ///
    /// `host_port` is the result of the host's own lookup; `None` or `0`
    /// falls back to the configured port.
    pub fn resolve(&self, host_port: Option<u16>) -> Address {
        let port = host_port.filter(|p| *p != 0).unwrap_or(self.port);
        Address::new(self.host.clone(), port).with_path(self.path.clone())
    }

    pub fn address(&self) -> Address {
        self.resolve(None)
    }
}

/// Automatic reconnection after an unsolicited close.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first attempt in milliseconds.
    pub interval_ms: u64,
    /// Attempts before giving up; `0` disables reconnection.
    pub max_attempts: u32,
    /// Growth factor between attempts; `1.0` keeps the interval fixed.
    pub multiplier: f64,
    /// Upper bound on the delay in milliseconds.
    pub max_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_attempts: 30,
            multiplier: 1.0,
            max_interval_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut wait = self.interval_ms as f64;
        let cap = self.max_interval_ms.max(self.interval_ms) as f64;
        for _ in 1..attempt {
            wait *= self.multiplier.max(1.0);
            if wait >= cap {
                wait = cap;
                break;
            }
        }
        Duration::from_millis(wait as u64)
    }
}

/// Configuration for a [`crate::Client`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub backend: BackendConfig,
    /// Deadline for each call in milliseconds (default 30s).
    pub request_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            request_timeout_ms: 30_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Load from a JSON file with environment overrides.
    ///
    /// A missing file yields defaults; invalid JSON is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let defaults = to_value(&Self::default())?;

        let merged = if path.exists() {
            debug!(?path, "loading client config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            deep_merge(defaults, user)
        } else {
            debug!(?path, "client config not found, using defaults");
            defaults
        };

        let mut config: ClientConfig =
            serde_json::from_value(merged).map_err(|e| Error::Config(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `FLOWLINK_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Values that fail to parse or fall
    /// outside their range are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FLOWLINK_BACKEND_HOST").filter(|v| !v.trim().is_empty()) {
            self.backend.host = v.trim().to_string();
        }
        if let Some(v) = parse_in_range(lookup("FLOWLINK_BACKEND_PORT"), 1, 65535) {
            self.backend.port = v as u16;
        }
        if let Some(v) = parse_in_range(lookup("FLOWLINK_REQUEST_TIMEOUT_MS"), 100, 600_000) {
            self.request_timeout_ms = v;
        }
        if let Some(v) = parse_in_range(lookup("FLOWLINK_RECONNECT_INTERVAL_MS"), 10, 600_000) {
            self.reconnect.interval_ms = v;
        }
        if let Some(v) = parse_in_range(lookup("FLOWLINK_RECONNECT_MAX_ATTEMPTS"), 0, 10_000) {
            self.reconnect.max_attempts = v as u32;
        }
    }
}

fn to_value(config: &ClientConfig) -> Result<Value> {
    serde_json::to_value(config).map_err(|e| Error::Config(e.to_string()))
}

fn parse_in_range(raw: Option<String>, min: u64, max: u64) -> Option<u64> {
    raw?.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and nulls
/// in `source` leave `target` untouched.
fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}
