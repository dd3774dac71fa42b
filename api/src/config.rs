//! Server configuration module.
//!
//! Handles loading configuration from environment variables with sensible defaults.

use anyhow::{bail, Context, Result};
use shared::config::{env_parse, PipelineConfig};
use std::net::SocketAddr;
use std::str::FromStr;

/// Event channel transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelKind {
    /// In-process broadcast channel.
    #[default]
    Memory,
    /// NATS `JetStream`.
    Nats,
}

impl FromStr for ChannelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "nats" => Ok(Self::Nats),
            other => bail!("unknown channel '{other}', expected 'memory' or 'nats'"),
        }
    }
}

/// Record store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// In-memory store.
    #[default]
    Memory,
    /// `ClickHouse` store.
    ClickHouse,
    /// No store: the persistence consumer does not run and search is unavailable.
    None,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "clickhouse" => Ok(Self::ClickHouse),
            "none" => Ok(Self::None),
            other => bail!("unknown store '{other}', expected 'memory', 'clickhouse' or 'none'"),
        }
    }
}

/// Server configuration.
///
/// Configuration values can be set via environment variables:
/// - `TRACKLOG_HOST`: The host address to bind to (default: "0.0.0.0")
/// - `TRACKLOG_PORT`: The port to listen on (default: 8080)
/// - `TRACKLOG_CHANNEL`: Event channel, `memory` or `nats` (default: memory)
/// - `TRACKLOG_NATS_URL`: NATS server (default: <nats://localhost:4222>)
/// - `TRACKLOG_NATS_STREAM`: `JetStream` stream name (default: "TRACKLOG")
/// - `TRACKLOG_STORE`: Record store, `memory`, `clickhouse` or `none` (default: memory)
/// - `TRACKLOG_MAX_BODY_BYTES`: Maximum request body size (default: 1 MiB)
///
/// Pipeline settings are read by [`PipelineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// Event channel transport.
    pub channel: ChannelKind,
    /// NATS server URL.
    pub nats_url: String,
    /// `JetStream` stream name.
    pub nats_stream: String,
    /// Record store backend.
    pub store: StoreKind,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
    /// Audit pipeline settings.
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `TRACKLOG_PORT` is set but cannot be parsed as a valid port number
    /// - `TRACKLOG_CHANNEL` or `TRACKLOG_STORE` names an unknown backend
    /// - A pipeline setting is invalid
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("TRACKLOG_HOST").unwrap_or(defaults.host);
        let port = env_parse::<u16>("TRACKLOG_PORT")?.unwrap_or(defaults.port);

        let channel = std::env::var("TRACKLOG_CHANNEL")
            .ok()
            .map(|v| v.parse::<ChannelKind>())
            .transpose()?
            .unwrap_or(defaults.channel);

        let store = std::env::var("TRACKLOG_STORE")
            .ok()
            .map(|v| v.parse::<StoreKind>())
            .transpose()?
            .unwrap_or(defaults.store);

        let max_body_bytes =
            env_parse::<usize>("TRACKLOG_MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes);
        if max_body_bytes == 0 {
            bail!("TRACKLOG_MAX_BODY_BYTES must be greater than zero");
        }

        Ok(Self {
            host,
            port,
            channel,
            nats_url: std::env::var("TRACKLOG_NATS_URL").unwrap_or(defaults.nats_url),
            nats_stream: std::env::var("TRACKLOG_NATS_STREAM").unwrap_or(defaults.nats_stream),
            store,
            max_body_bytes,
            pipeline: PipelineConfig::from_env().context("Invalid pipeline configuration")?,
        })
    }

    /// Returns the socket address for binding.
    ///
    /// # Panics
    ///
    /// Panics if the host and port combination cannot be parsed as a valid socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid socket address from config")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            channel: ChannelKind::Memory,
            nats_url: "nats://localhost:4222".to_string(),
            nats_stream: "TRACKLOG".to_string(),
            store: StoreKind::Memory,
            max_body_bytes: 1024 * 1024,
            pipeline: PipelineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.channel, ChannelKind::Memory);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.max_body_bytes, 1_048_576);
    }

    #[test]
    fn test_config_socket_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ..Config::default()
        };
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_channel_kind_parse() {
        assert_eq!("NATS".parse::<ChannelKind>().unwrap(), ChannelKind::Nats);
        assert_eq!(" memory ".parse::<ChannelKind>().unwrap(), ChannelKind::Memory);
        assert!("kafka".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("ClickHouse".parse::<StoreKind>().unwrap(), StoreKind::ClickHouse);
        assert_eq!("none".parse::<StoreKind>().unwrap(), StoreKind::None);
        assert!("mongo".parse::<StoreKind>().is_err());
    }
}
