//! Configuration types for the relay gateway
//!
//! This module provides configuration structures for the bus driver, the
//! wireless relay, the update hand-off and the credential store layout.

use busrelay_core::MacAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::interface::BusAlerts;

/// Bus identifier reserved for update trigger frames
pub const UPDATE_TRIGGER_ID: u32 = 0x0;

/// Bus identifier reserved for provisioning frames
pub const PROVISIONING_ID: u32 = 0x1;

/// Default alert wait bound, which also caps forwarding latency
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 33;

/// Default time the update subsystem may hold the device
pub const DEFAULT_UPDATE_TIMEOUT_MS: u64 = 180_000;

/// Default bus bitrate
pub const DEFAULT_BITRATE: u32 = 500_000;

/// Default network name prefix of the device host name
pub const DEFAULT_HOST_PREFIX: &str = "esp32";

/// Default transmit pin
pub const DEFAULT_TX_PIN: u8 = 15;

/// Default receive pin
pub const DEFAULT_RX_PIN: u8 = 13;

/// Main configuration for the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bus driver settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Wireless relay settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Update hand-off settings
    #[serde(default)]
    pub update: UpdateConfig,

    /// Credential store layout
    #[serde(default)]
    pub store: StoreConfig,
}

impl GatewayConfig {
    /// Check the configuration for values the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.update.host_prefix.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "update.host_prefix must not be empty".to_string(),
            ));
        }
        if self.bus.poll_interval.is_zero() {
            return Err(GatewayError::InvalidConfig(
                "bus.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.update.timeout.is_zero() {
            return Err(GatewayError::InvalidConfig(
                "update.timeout must be greater than zero".to_string(),
            ));
        }
        if self.store.namespace.is_empty()
            || self.store.name_key.is_empty()
            || self.store.secret_key.is_empty()
        {
            return Err(GatewayError::InvalidConfig(
                "store namespace and keys must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Controller operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusMode {
    /// Participate normally, acknowledging frames
    Normal,
    /// Transmit without requiring acknowledgement
    NoAck,
    /// Receive only
    ListenOnly,
}

/// Bus driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Transmit pin
    #[serde(default = "default_tx_pin")]
    pub tx_pin: u8,

    /// Receive pin
    #[serde(default = "default_rx_pin")]
    pub rx_pin: u8,

    /// Bitrate in bits per second
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Controller mode
    #[serde(default = "default_bus_mode")]
    pub mode: BusMode,

    /// Alerts the driver should report
    #[serde(default = "default_alerts")]
    pub alerts: BusAlerts,

    /// Upper bound on a single alert wait
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Log driver status every this many polls (0 disables)
    #[serde(default = "default_status_log_every")]
    pub status_log_every: u32,
}

fn default_tx_pin() -> u8 {
    DEFAULT_TX_PIN
}

fn default_rx_pin() -> u8 {
    DEFAULT_RX_PIN
}

fn default_bitrate() -> u32 {
    DEFAULT_BITRATE
}

fn default_bus_mode() -> BusMode {
    BusMode::NoAck
}

fn default_alerts() -> BusAlerts {
    BusAlerts::RX_DATA | BusAlerts::ERR_PASS | BusAlerts::BUS_ERROR | BusAlerts::RX_QUEUE_FULL
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}

fn default_status_log_every() -> u32 {
    100
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            tx_pin: DEFAULT_TX_PIN,
            rx_pin: DEFAULT_RX_PIN,
            bitrate: DEFAULT_BITRATE,
            mode: BusMode::NoAck,
            alerts: default_alerts(),
            poll_interval: default_poll_interval(),
            status_log_every: 100,
        }
    }
}

/// Wireless relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// The single peer every record is sent to
    #[serde(default)]
    pub peer_address: MacAddress,

    /// Radio channel (0 follows the station channel)
    #[serde(default)]
    pub channel: u8,
}

/// Update hand-off configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Network name prefix of the device host name
    #[serde(default = "default_host_prefix")]
    pub host_prefix: String,

    /// How long the update subsystem may hold the device
    #[serde(with = "humantime_serde", default = "default_update_timeout")]
    pub timeout: Duration,
}

fn default_host_prefix() -> String {
    DEFAULT_HOST_PREFIX.to_string()
}

fn default_update_timeout() -> Duration {
    Duration::from_millis(DEFAULT_UPDATE_TIMEOUT_MS)
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            host_prefix: default_host_prefix(),
            timeout: default_update_timeout(),
        }
    }
}

/// Where credentials live in the persistent store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Key holding the network name
    #[serde(default = "default_name_key")]
    pub name_key: String,

    /// Key holding the network secret
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

fn default_namespace() -> String {
    "wifi".to_string()
}

fn default_name_key() -> String {
    "ssid".to_string()
}

fn default_secret_key() -> String {
    "password".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            name_key: default_name_key(),
            secret_key: default_secret_key(),
        }
    }
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host name prefix
    pub fn host_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.update.host_prefix = prefix.into();
        self
    }

    /// Set the update timeout
    pub fn update_timeout(mut self, timeout: Duration) -> Self {
        self.config.update.timeout = timeout;
        self
    }

    /// Set the alert wait bound
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.bus.poll_interval = interval;
        self
    }

    /// Set the bus bitrate
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.config.bus.bitrate = bitrate;
        self
    }

    /// Set the bus pins
    pub fn pins(mut self, tx_pin: u8, rx_pin: u8) -> Self {
        self.config.bus.tx_pin = tx_pin;
        self.config.bus.rx_pin = rx_pin;
        self
    }

    /// Set the relay peer
    pub fn peer_address(mut self, peer: MacAddress) -> Self {
        self.config.relay.peer_address = peer;
        self
    }

    /// Set how often driver status is logged
    pub fn status_log_every(mut self, polls: u32) -> Self {
        self.config.bus.status_log_every = polls;
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
