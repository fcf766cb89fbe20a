//! Collaborator interfaces for the gateway
//!
//! The engine talks to four external collaborators, each behind a trait:
//!
//! - [`BusInterface`] - the bus controller driver (frame receive, alerts)
//! - [`RelayInterface`] - the wireless broadcast transport
//! - [`CredentialStore`] - the persistent key-value store
//! - [`UpdateSubsystem`] - the firmware-update hand-off
//!
//! Hosts provide implementations; `crate::test_utils` provides in-memory
//! doubles for tests.

use async_trait::async_trait;
use busrelay_core::{BusFrame, MacAddress, RelayRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BusConfig;
use crate::error::Result;

/// Bit mask of driver alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusAlerts(pub u32);

impl BusAlerts {
    /// No alerts
    pub const NONE: BusAlerts = BusAlerts(0);
    /// One or more frames are waiting in the receive queue
    pub const RX_DATA: BusAlerts = BusAlerts(0x0004);
    /// A bus error occurred
    pub const BUS_ERROR: BusAlerts = BusAlerts(0x0200);
    /// The receive queue overflowed and frames were lost
    pub const RX_QUEUE_FULL: BusAlerts = BusAlerts(0x0800);
    /// The controller entered the error-passive state
    pub const ERR_PASS: BusAlerts = BusAlerts(0x1000);

    /// Check whether every bit of `other` is set
    pub fn contains(self, other: BusAlerts) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Check if no bits are set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BusAlerts {
    type Output = BusAlerts;

    fn bitor(self, rhs: Self) -> Self::Output {
        BusAlerts(self.0 | rhs.0)
    }
}

impl BitOrAssign for BusAlerts {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for BusAlerts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (BusAlerts::RX_DATA, "rx_data"),
            (BusAlerts::BUS_ERROR, "bus_error"),
            (BusAlerts::RX_QUEUE_FULL, "rx_queue_full"),
            (BusAlerts::ERR_PASS, "err_pass"),
        ]
        .iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Driver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStatus {
    /// Receive error counter
    pub rx_error_counter: u32,
    /// Transmit error counter
    pub tx_error_counter: u32,
    /// Frames waiting in the receive queue
    pub msgs_to_rx: u32,
}

/// Trait for the bus controller driver
///
/// Only `Send` is required: the driver is owned and polled by one task.
#[async_trait]
pub trait BusInterface: Send {
    /// Install and start the driver, then configure alerts
    ///
    /// Each step reports its own error so the caller can log which one failed.
    async fn start(&mut self, config: &BusConfig) -> Result<()>;

    /// Wait up to `timeout` for alerts; returns an empty mask on timeout
    async fn wait_for_alerts(&mut self, timeout: Duration) -> Result<BusAlerts>;

    /// Take the next queued frame without waiting
    async fn receive_frame(&mut self) -> Result<Option<BusFrame>>;

    /// Current driver counters
    fn status(&self) -> BusStatus;

    /// Check if a finite frame source has nothing more to give
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Get the interface name (for logging)
    fn name(&self) -> &str;
}

/// Outcome of a wireless send, reported after the fact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The transport accepted and transmitted the record
    Delivered,
    /// The transport reported a failure
    Failed,
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStatus::Delivered => write!(f, "delivered"),
            SendStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Callback invoked by relays with each send outcome
pub type SendResultCallback = Arc<dyn Fn(MacAddress, SendStatus) + Send + Sync>;

/// Send-result callback that only logs
pub fn logging_send_callback() -> SendResultCallback {
    Arc::new(|peer: MacAddress, status: SendStatus| match status {
        SendStatus::Delivered => debug!(%peer, "Relay delivery success"),
        SendStatus::Failed => warn!(%peer, "Relay delivery failed"),
    })
}

/// Trait for the wireless broadcast transport
#[async_trait]
pub trait RelayInterface: Send + Sync {
    /// Send a record to the configured peer; no acknowledgement is awaited
    async fn broadcast(&mut self, record: &RelayRecord) -> Result<()>;

    /// The peer every record goes to
    fn peer(&self) -> MacAddress;

    /// Get the interface name (for logging)
    fn name(&self) -> &str;
}

/// Trait for the persistent key-value store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value; `None` if the key was never written
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Write a value
    async fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Delete a key; deleting an absent key succeeds
    async fn remove(&mut self, namespace: &str, key: &str) -> Result<()>;
}

/// Trait for the firmware-update subsystem
#[async_trait]
pub trait UpdateSubsystem: Send + Sync {
    /// The host name this device advertises
    fn host_name(&self) -> String;

    /// Hold the device in update mode until the session ends or `timeout` passes
    async fn enter_update_mode(&mut self, timeout: Duration, name: &str, secret: &str)
        -> Result<()>;
}
