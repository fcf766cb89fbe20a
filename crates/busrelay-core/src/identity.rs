//! Device identity and host-name formatting
//!
//! Devices advertise a host name of the form `<prefix>-XXXXXX`, where the six
//! hex digits are the last three bytes of the station MAC address. Update
//! trigger frames carry those three bytes so a shared bus can address a
//! single device.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Number of address bytes carried by an update trigger frame
pub const ADDRESS_FRAGMENT_LEN: usize = 3;

/// Six-byte hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// All-ones broadcast address
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// Trailing bytes used in the advertised host name
    pub fn fragment(&self) -> [u8; ADDRESS_FRAGMENT_LEN] {
        [self.0[3], self.0[4], self.0[5]]
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl Default for MacAddress {
    fn default() -> Self {
        Self::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let cleaned: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&cleaned).map_err(|e| CoreError::InvalidMac(format!("{}: {}", s, e)))?;
        let array: [u8; 6] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidMac(format!("{}: expected 6 bytes", s)))?;
        Ok(MacAddress(array))
    }
}

/// Build the host name a trigger frame addresses
///
/// ```
/// use busrelay_core::identity::target_host_name;
/// assert_eq!(target_host_name("dev", [0xA1, 0xB2, 0xC3]), "dev-A1B2C3");
/// ```
pub fn target_host_name(prefix: &str, fragment: [u8; ADDRESS_FRAGMENT_LEN]) -> String {
    format!("{}-{}", prefix, hex::encode_upper(fragment))
}

/// Identity a device advertises to the update subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    prefix: String,
    host_name: String,
}

impl DeviceIdentity {
    /// Derive the identity from a station MAC address
    pub fn from_mac(prefix: impl Into<String>, mac: &MacAddress) -> Self {
        let prefix = prefix.into();
        let host_name = target_host_name(&prefix, mac.fragment());
        Self { prefix, host_name }
    }

    /// Use an explicitly assigned host name
    pub fn with_host_name(prefix: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            host_name: host_name.into(),
        }
    }

    /// Network name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Advertised host name
    pub fn host_name(&self) -> &str {
        &self.host_name
    }
}
