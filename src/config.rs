// src/config.rs

//! Manages server configuration: loading, defaults, and validation.
//!
//! The configuration is constructed once and handed to the codec, the
//! dispatcher and the server at construction time.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Byte order used for every multi-byte header field on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// The WebSocket message kind used for outbound frames.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Binary,
    Text,
}

/// Wire frame shape shared by every connection of a deployment.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageConfig {
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_true")]
    pub include_type_field: bool,
    #[serde(default = "default_true")]
    pub include_length_field: bool,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            format: MessageFormat::default(),
            byte_order: ByteOrder::default(),
            include_type_field: true,
            include_length_field: true,
        }
    }
}

/// Keep-alive and write deadlines for every connection.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KeepAliveConfig {
    /// Time allowed to read the next frame (or pong) from the peer.
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,
    /// Time allowed to write a message to the peer.
    #[serde(default = "default_write_wait_ms")]
    pub write_wait_ms: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: default_pong_wait_ms(),
            write_wait_ms: default_write_wait_ms(),
        }
    }
}

impl KeepAliveConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Pings are sent at nine tenths of the peer's read deadline.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms * 9 / 10)
    }
}

/// Cross-instance redirection over a Redis-protocol pub/sub bus.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DistributeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bus_address")]
    pub bus_address: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_world_channel")]
    pub world_channel: String,
    #[serde(default = "default_forward_channel")]
    pub forward_channel: String,
}

impl Default for DistributeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bus_address: default_bus_address(),
            password: None,
            world_channel: default_world_channel(),
            forward_channel: default_forward_channel(),
        }
    }
}

/// Settings for the connection id generator.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdConfig {
    #[serde(default = "default_machine_id")]
    pub machine_id: u16,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            machine_id: default_machine_id(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_worker_task_len() -> u32 {
    1024
}
fn default_max_package_size() -> u32 {
    4096
}
fn default_send_queue_len() -> usize {
    16
}
fn default_pong_wait_ms() -> u64 {
    60_000
}
fn default_write_wait_ms() -> u64 {
    10_000
}
fn default_bus_address() -> String {
    "127.0.0.1:6379".to_string()
}
fn default_world_channel() -> String {
    "world_channel".to_string()
}
fn default_forward_channel() -> String {
    "forward_channel".to_string()
}
fn default_machine_id() -> u16 {
    1
}

/// The validated server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Number of worker lanes. `0` dispatches every message on its own task.
    pub worker_pool_size: u32,
    /// Queue depth of each worker lane.
    pub max_worker_task_len: u32,
    /// Hard cap on payload length. `0` means unlimited.
    pub max_package_size: u32,
    /// Depth of each connection's outbound queue.
    pub send_queue_len: usize,
    pub message: MessageConfig,
    pub keepalive: KeepAliveConfig,
    pub distribute: DistributeConfig,
    pub id: IdConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            worker_pool_size: 0,
            max_worker_task_len: default_max_worker_task_len(),
            max_package_size: default_max_package_size(),
            send_queue_len: default_send_queue_len(),
            message: MessageConfig::default(),
            keepalive: KeepAliveConfig::default(),
            distribute: DistributeConfig::default(),
            id: IdConfig::default(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    worker_pool_size: u32,
    #[serde(default = "default_max_worker_task_len")]
    max_worker_task_len: u32,
    #[serde(default = "default_max_package_size")]
    max_package_size: u32,
    #[serde(default = "default_send_queue_len")]
    send_queue_len: usize,
    #[serde(default)]
    message: MessageConfig,
    #[serde(default)]
    keepalive: KeepAliveConfig,
    #[serde(default)]
    distribute: DistributeConfig,
    #[serde(default)]
    id: IdConfig,
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load configuration from '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;

        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            worker_pool_size: raw.worker_pool_size,
            max_worker_task_len: raw.max_worker_task_len,
            max_package_size: raw.max_package_size,
            send_queue_len: raw.send_queue_len,
            message: raw.message,
            keepalive: raw.keepalive,
            distribute: raw.distribute,
            id: raw.id,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.send_queue_len == 0 {
            return Err(anyhow!("send_queue_len cannot be 0"));
        }
        if self.worker_pool_size > 0 && self.max_worker_task_len == 0 {
            return Err(anyhow!(
                "max_worker_task_len must be greater than 0 when worker_pool_size is set"
            ));
        }
        if self.keepalive.pong_wait_ms < 10 {
            return Err(anyhow!("keepalive.pong_wait_ms must be at least 10"));
        }
        if self.keepalive.write_wait_ms == 0 {
            return Err(anyhow!("keepalive.write_wait_ms cannot be 0"));
        }
        if self.max_package_size == 0 {
            warn!("max_package_size is 0: inbound payload size is unlimited.");
        }
        if !self.message.include_length_field && !self.message.include_type_field {
            warn!(
                "Frames carry neither a type nor a length field; every message routes to type 0."
            );
        }

        if self.distribute.enabled {
            if self.distribute.bus_address.trim().is_empty() {
                return Err(anyhow!(
                    "distribute.bus_address cannot be empty when distribution is enabled"
                ));
            }
            if self.distribute.world_channel.trim().is_empty() {
                return Err(anyhow!("distribute.world_channel cannot be empty"));
            }
            if self.distribute.forward_channel.trim().is_empty() {
                return Err(anyhow!("distribute.forward_channel cannot be empty"));
            }
        }
        if self.id.machine_id == 0 {
            return Err(anyhow!("id.machine_id cannot be 0"));
        }
        Ok(())
    }
}
