pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl Configuration {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — allowing the proxy to start with zero configuration for
    /// local development, same as the gateway's `GatewayConfig::load`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Configuration = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            Configuration::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded olla configuration");
        Ok(config)
    }

    /// Apply environment variable overrides for runtime knobs. Mirrors the
    /// shape of the original gateway's infra-only env overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OLLA_PROXY_PREFIX") {
            self.proxy_prefix = v;
        }
        if let Ok(v) = std::env::var("OLLA_CONNECTION_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<f64>() {
                self.connection_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("OLLA_READ_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<f64>() {
                self.read_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("OLLA_RESPONSE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<f64>() {
                self.response_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("OLLA_STREAM_BUFFER_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                self.stream_buffer_size = n;
            }
        }
        if let Ok(v) = std::env::var("OLLA_TRUSTED_PROXIES") {
            self.trusted_proxies = v.split(',').map(|s| s.trim().to_string()).collect();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.proxy_prefix.starts_with('/') {
            anyhow::bail!("proxy_prefix must start with '/', got {:?}", self.proxy_prefix);
        }
        if self.stream_buffer_size == 0 {
            anyhow::bail!("stream_buffer_size must be > 0");
        }
        for cidr in &self.trusted_proxies {
            cidr.parse::<ipnet::IpNet>()
                .map_err(|e| anyhow::anyhow!("invalid trusted_proxies entry {:?}: {e}", cidr))?;
        }
        Ok(())
    }
}
