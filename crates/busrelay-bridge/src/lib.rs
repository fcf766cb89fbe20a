//! Bus-to-wireless relay gateway engine
//!
//! This crate turns frames read from a field bus into fixed-width records
//! broadcast over a wireless link, and serves two control protocols carried
//! on reserved bus identifiers: credential provisioning and a remote
//! firmware-update trigger.
//!
//! # Architecture
//!
//! The engine is layered:
//!
//! 1. **Collaborators** - bus driver, wireless relay, credential store and
//!    update subsystem, each behind a trait in [`interface`]
//! 2. **Protocol machines** - [`translator`], [`provisioning`], [`trigger`]
//! 3. **Routing** - [`dispatcher`] sends each frame to exactly one machine
//! 4. **Service** - [`bridge`] runs the poll loop and owns the mode machine
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use busrelay_bridge::{GatewayBridge, GatewayConfigBuilder};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfigBuilder::new().host_prefix("esp32").build();
//!     config.validate()?;
//!
//!     let (bridge, handle) = GatewayBridge::new(bus, relay, store, updater, config);
//!     bridge.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Reserved identifiers
//!
//! | identifier | meaning |
//! |------------|---------|
//! | `0x0` | update trigger: bytes 0-2 select a device by address |
//! | `0x1` | provisioning: byte 0 is the subtype (1 start, 2 name, 3 secret, 4 end) |
//! | other | relayed verbatim |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Foundations
pub mod config;
pub mod error;
pub mod interface;

// Protocol machines
pub mod credential;
pub mod provisioning;
pub mod translator;
pub mod trigger;

// Routing and service
pub mod bridge;
pub mod dispatcher;

// Testing utilities
pub mod test_utils;

pub use bridge::{BridgeCommand, BridgeHandle, BridgeStats, DriverState, GatewayBridge, GatewayMode};
pub use config::{
    BusConfig, BusMode, GatewayConfig, GatewayConfigBuilder, RelayConfig, StoreConfig,
    UpdateConfig, PROVISIONING_ID, UPDATE_TRIGGER_ID,
};
pub use credential::Credential;
pub use dispatcher::{CommitResult, Dispatched, FrameRoute, MessageDispatcher};
pub use error::{GatewayError, Result};
pub use interface::{
    logging_send_callback, BusAlerts, BusInterface, BusStatus, CredentialStore, RelayInterface,
    SendResultCallback, SendStatus, UpdateSubsystem,
};
pub use provisioning::{
    xor_checksum, ProvisioningEvent, ProvisioningPhase, ProvisioningRejection, ProvisioningSession,
};
pub use translator::FrameTranslator;
pub use trigger::{TriggerAction, TriggerOutcome, UpdateTrigger};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
