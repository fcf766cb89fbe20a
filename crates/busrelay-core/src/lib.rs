//! Busrelay Core - Wire types for the bus-to-wireless relay gateway
//!
//! This crate holds the types shared by the gateway engine and its hosts:
//!
//! - [`frame`] - Bus frames and the fixed-width records relayed over the air
//! - [`identity`] - Device host names and hardware addresses
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust
//! use busrelay_core::{BusFrame, RelayRecord};
//!
//! let frame: BusFrame = "123#CAFE".parse().unwrap();
//! assert_eq!(frame.payload(), &[0xCA, 0xFE]);
//!
//! let record = RelayRecord::decode(&[0x23, 0x01, 0, 0, 2, 0xCA, 0xFE, 0, 0, 0, 0, 0, 0]).unwrap();
//! assert_eq!(record.identifier, 0x123);
//! ```

pub mod error;
pub mod frame;
pub mod identity;

pub use error::{CoreError, Result};
pub use frame::{
    BusFrame, RelayRecord, MAX_DATA_LEN, MAX_EXTENDED_ID, MAX_STANDARD_ID, RELAY_RECORD_SIZE,
};
pub use identity::{target_host_name, DeviceIdentity, MacAddress, ADDRESS_FRAGMENT_LEN};
