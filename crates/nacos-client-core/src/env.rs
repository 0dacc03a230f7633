//! Environment-driven helpers for bootstrapping the client.
//!
//! Derives client settings from the host process environment while staying
//! embedder-agnostic: the same values can be supplied programmatically, and
//! tests feed `from_env_iter` a literal list instead of touching the real
//! environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Environment variable carrying the server address (`host:port` or full URL).
const ENV_SERVER_ADDR: &str = "NACOS_SERVER_ADDR";
/// Environment variable selecting the namespace (tenant). Empty means the default namespace.
const ENV_NAMESPACE: &str = "NACOS_NAMESPACE";
/// Environment variable selecting the default configuration/service group.
const ENV_GROUP: &str = "NACOS_GROUP";
/// Environment variable overriding the initial heartbeat interval, in milliseconds.
const ENV_HEARTBEAT_INTERVAL_MS: &str = "NACOS_HEARTBEAT_INTERVAL_MS";

/// Default server address targeting a local standalone server.
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8848";
/// Group used when none is configured.
const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
/// Initial heartbeat interval used when none is configured.
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Captures environment-derived options used to bootstrap the client.
#[derive(Debug, Clone)]
pub struct ClientEnv {
    /// Server address, either `host:port` or a full URL.
    pub server_addr: String,
    /// Namespace (tenant) identifier; empty selects the server default.
    pub namespace: String,
    /// Default group for configuration and service operations.
    pub group: String,
    /// Initial heartbeat interval for registered instances.
    pub heartbeat_interval: Duration,
}

impl ClientEnv {
    /// Builds settings from the current process environment.
    ///
    /// Side-effect free apart from reading `std::env::vars`; callers can
    /// override individual fields before constructing clients.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let server_addr = map
            .get(ENV_SERVER_ADDR)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());
        // An absent or blank namespace means the server-side default namespace.
        let namespace = map
            .get(ENV_NAMESPACE)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_default();
        let group = map
            .get(ENV_GROUP)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());
        let heartbeat_interval = Duration::from_millis(parse_millis(
            map.get(ENV_HEARTBEAT_INTERVAL_MS).map(String::as_str),
            DEFAULT_HEARTBEAT_INTERVAL_MS,
        ));

        Self {
            server_addr,
            namespace,
            group,
            heartbeat_interval,
        }
    }

    /// Builds the server base URL from the captured address.
    ///
    /// A bare `host:port` is promoted to `http://host:port`; addresses that
    /// already carry a scheme pass through unchanged.
    pub fn base_url(&self) -> String {
        let addr = self.server_addr.trim_end_matches('/');
        if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        }
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses a positive millisecond count, falling back to the provided default.
fn parse_millis(value: Option<&str>, default: u64) -> u64 {
    match value.map(str::trim).and_then(|s| s.parse::<u64>().ok()) {
        Some(ms) if ms > 0 => ms,
        // Zero and unparsable inputs both fall back: a zero interval would
        // spin the heartbeat driver.
        _ => default,
    }
}
