use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming-mode profile (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProfile {
    Auto,
    Streaming,
    Buffered,
    Standard,
}

impl Default for StreamProfile {
    fn default() -> Self {
        StreamProfile::Auto
    }
}

/// Runtime-mutable proxy configuration (spec §3 "Configuration").
///
/// Consumers read a whole snapshot at a time (see `server::state::GatewayState`,
/// which holds this behind an `arc_swap::ArcSwap`) rather than locking
/// individual fields — a reader may observe a mixed-generation view across
/// two concurrent requests during a config swap, which spec.md §9 calls out
/// as an accepted tradeoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,

    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: f64,

    #[serde(default = "default_connection_keepalive_secs")]
    pub connection_keepalive_secs: f64,

    /// 0 = unbounded.
    #[serde(default)]
    pub response_timeout_secs: f64,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: f64,

    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,

    #[serde(default)]
    pub profile: StreamProfile,

    /// CIDR ranges whose `X-Forwarded-For`/`X-Real-IP` are trusted (§4.2).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    #[serde(default = "default_proxied_by_name")]
    pub proxied_by_name: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            proxy_prefix: default_proxy_prefix(),
            connection_timeout_secs: default_connection_timeout_secs(),
            connection_keepalive_secs: default_connection_keepalive_secs(),
            response_timeout_secs: 0.0,
            read_timeout_secs: default_read_timeout_secs(),
            stream_buffer_size: default_stream_buffer_size(),
            profile: StreamProfile::default(),
            trusted_proxies: Vec::new(),
            proxied_by_name: default_proxied_by_name(),
        }
    }
}

impl Configuration {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_secs)
    }

    pub fn connection_keepalive(&self) -> Duration {
        Duration::from_secs_f64(self.connection_keepalive_secs)
    }

    /// `None` when unbounded (0 means "no response timeout").
    pub fn response_timeout(&self) -> Option<Duration> {
        if self.response_timeout_secs > 0.0 {
            Some(Duration::from_secs_f64(self.response_timeout_secs))
        } else {
            None
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_secs)
    }
}

fn default_proxy_prefix() -> String {
    "/olla".to_string()
}

fn default_connection_timeout_secs() -> f64 {
    10.0
}

fn default_connection_keepalive_secs() -> f64 {
    30.0
}

fn default_read_timeout_secs() -> f64 {
    60.0
}

fn default_stream_buffer_size() -> usize {
    8 * 1024
}

fn default_proxied_by_name() -> String {
    "olla".to_string()
}
