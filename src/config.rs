// Copyright 2020 Joyent, Inc.

use std::env;
use std::time::Duration;

use crate::error::TransportError;

pub const DEFAULT_SOCKET_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:8080/api";

/// Same deadline for every socket request, whatever the route.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Flat delay between a socket closing and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_SOCKET_URL: &str = "API_SOCKET_URL";
const ENV_HTTP_URL: &str = "API_HTTP_URL";
const ENV_REQUEST_TIMEOUT_MS: &str = "API_REQUEST_TIMEOUT_MS";
const ENV_RECONNECT_DELAY_MS: &str = "API_RECONNECT_DELAY_MS";
const ENV_CONNECT_TIMEOUT_MS: &str = "API_CONNECT_TIMEOUT_MS";

/// Endpoints and timing for one `ApiClient`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// WebSocket endpoint of the persistent connection.
    pub socket_url: String,
    /// HTTP endpoint the fallback transport POSTs to.
    pub http_url: String,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Upper bound on a single connect attempt, handshake included.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            socket_url: String::from(DEFAULT_SOCKET_URL),
            http_url: String::from(DEFAULT_HTTP_URL),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    pub fn new<S: Into<String>, H: Into<String>>(socket_url: S, http_url: H) -> Self {
        TransportConfig {
            socket_url: socket_url.into(),
            http_url: http_url.into(),
            ..TransportConfig::default()
        }
    }

    /// Defaults overlaid with whatever `API_*` variables are set.
    pub fn from_env() -> Result<Self, TransportError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, TransportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = TransportConfig::default();

        if let Some(url) = lookup(ENV_SOCKET_URL) {
            config.socket_url = url;
        }
        if let Some(url) = lookup(ENV_HTTP_URL) {
            config.http_url = url;
        }
        if let Some(ms) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout = parse_millis(ENV_REQUEST_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_RECONNECT_DELAY_MS) {
            config.reconnect_delay = parse_millis(ENV_RECONNECT_DELAY_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, &ms)?;
        }

        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, TransportError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| TransportError::Config(format!("{}={:?}: {}", key, value, e)))
}
