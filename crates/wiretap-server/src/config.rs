//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a JSON config file is given, deep-merge its values over defaults
//! 3. Apply `WIRETAP_*` environment variable overrides
//! 4. Validate
//!
//! CLI flags are applied by the binary on top of the loaded value.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::ConfigError;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Configuration for the wiretap server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (`host:port`).
    pub addr: String,
    /// Largest plain-HTTP request body that is buffered and logged.
    pub max_request_body: usize,
    /// Timeout for plain HTTP requests. Upgraded sessions are not bounded.
    pub request_timeout_secs: u64,
    /// How long to wait for live sessions on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Per-connection WebSocket settings.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.into(),
            max_request_body: 1024 * 1024,
            request_timeout_secs: 5,
            shutdown_timeout_secs: 10,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Plain HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Graceful shutdown budget.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Reject values that would make the server misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::InvalidValue("addr must not be empty".into()));
        }
        self.session.validate()
    }
}

/// Settings for one WebSocket session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between outbound pings.
    pub ping_interval_secs: u64,
    /// Read liveness window; refreshed by every inbound frame.
    pub liveness_timeout_secs: u64,
    /// Budget for writing one ping.
    pub ping_write_timeout_secs: u64,
    /// Budget for writing one echoed or control frame.
    pub write_timeout_secs: u64,
    /// Largest accepted frame payload in bytes.
    pub max_payload_len: u64,
    /// Capacity of the buffered reader wrapped around the socket.
    pub read_buffer_size: usize,
    /// Capacity of the outbound frame queue feeding the writer task.
    pub send_queue: usize,
    /// Bytes of payload shown in frame previews.
    pub preview_limit: usize,
    /// Echo the client's first offered subprotocol back in the handshake.
    pub select_subprotocol: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            liveness_timeout_secs: 60,
            ping_write_timeout_secs: 5,
            write_timeout_secs: 10,
            max_payload_len: wiretap_protocol::frame::DEFAULT_MAX_PAYLOAD_LEN,
            read_buffer_size: 8 * 1024,
            send_queue: 64,
            preview_limit: 512,
            select_subprotocol: false,
        }
    }
}

impl SessionConfig {
    /// Interval between outbound pings.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Read liveness window.
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    /// Budget for writing one ping.
    pub fn ping_write_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_write_timeout_secs)
    }

    /// Budget for writing one non-ping frame.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Reject values that would make a session misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("ping_interval_secs", self.ping_interval_secs),
            ("liveness_timeout_secs", self.liveness_timeout_secs),
            ("ping_write_timeout_secs", self.ping_write_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        if self.ping_interval_secs >= self.liveness_timeout_secs {
            return Err(ConfigError::InvalidValue(format!(
                "ping_interval_secs ({}) must be shorter than liveness_timeout_secs ({})",
                self.ping_interval_secs, self.liveness_timeout_secs
            )));
        }
        if self.send_queue == 0 || self.read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "send_queue and read_buffer_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from an optional JSON file plus env overrides.
///
/// A missing `path` means defaults. A path that does not exist is an error.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) => {
            debug!(?path, "loading config file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        None => defaults,
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`. Nulls in
/// `source` keep the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WIRETAP_*` overrides read through `lookup`.
///
/// Unparseable or out-of-range values are ignored.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("WIRETAP_ADDR").and_then(|v| non_empty(&v)) {
        config.addr = v;
    }
    if let Some(v) = lookup("WIRETAP_PING_INTERVAL_SECS").and_then(|v| parse_u64(&v, 1, 3600)) {
        config.session.ping_interval_secs = v;
    }
    if let Some(v) =
        lookup("WIRETAP_LIVENESS_TIMEOUT_SECS").and_then(|v| parse_u64(&v, 1, 86_400))
    {
        config.session.liveness_timeout_secs = v;
    }
    if let Some(v) =
        lookup("WIRETAP_MAX_PAYLOAD_LEN").and_then(|v| parse_u64(&v, 1, 1 << 32))
    {
        config.session.max_payload_len = v;
    }
    if let Some(v) = lookup("WIRETAP_SELECT_SUBPROTOCOL").and_then(|v| parse_bool(&v)) {
        config.session.select_subprotocol = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an integer within `[min, max]`.
pub fn parse_u64(val: &str, min: u64, max: u64) -> Option<u64> {
    val.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn non_empty(val: &str) -> Option<String> {
    let trimmed = val.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
