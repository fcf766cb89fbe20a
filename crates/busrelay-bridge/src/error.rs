//! Error types for gateway operations
//!
//! Every failure in the gateway is local: none of these errors stops the
//! poll loop. They are returned from collaborator calls, logged with their
//! [`GatewayError::error_code`], and the gateway carries on in whatever
//! degraded mode the failure implies.

use busrelay_core::CoreError;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Bus Driver Errors =====
    /// Driver installation failed
    #[error("Failed to install bus driver: {0}")]
    DriverInstallFailed(String),

    /// Driver start failed
    #[error("Failed to start bus driver: {0}")]
    DriverStartFailed(String),

    /// Alert reconfiguration failed
    #[error("Failed to configure bus alerts: {0}")]
    AlertConfigFailed(String),

    /// Reading from the bus failed
    #[error("Bus read error: {0}")]
    BusRead(String),

    /// Bus source has been closed
    #[error("Bus source closed")]
    BusClosed,

    // ===== Relay Errors =====
    /// Wireless send failed
    #[error("Relay send failed: {0}")]
    SendFailed(String),

    /// Relay peer registration failed
    #[error("Failed to register relay peer {peer}: {reason}")]
    PeerRegistrationFailed {
        /// Peer address
        peer: String,
        /// Failure reason
        reason: String,
    },

    // ===== Store Errors =====
    /// Reading from the persistent store failed
    #[error("Store read failed for {namespace}/{key}: {reason}")]
    StoreRead {
        /// Store namespace
        namespace: String,
        /// Key within the namespace
        key: String,
        /// Failure reason
        reason: String,
    },

    /// Writing to the persistent store failed
    #[error("Store write failed for {namespace}/{key}: {reason}")]
    StoreWrite {
        /// Store namespace
        namespace: String,
        /// Key within the namespace
        key: String,
        /// Failure reason
        reason: String,
    },

    // ===== Update Errors =====
    /// The update subsystem reported a failure
    #[error("Update mode failed: {0}")]
    UpdateFailed(String),

    // ===== Frame Errors =====
    /// Frame or record could not be built
    #[error(transparent)]
    Frame(#[from] CoreError),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Command channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Check if this error disables the bus driver for the rest of the process
    pub fn is_driver_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::DriverInstallFailed(_)
                | GatewayError::DriverStartFailed(_)
                | GatewayError::AlertConfigFailed(_)
        )
    }

    /// Check if a later attempt at the same operation could succeed
    ///
    /// The gateway itself never retries; this only informs logging.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::BusRead(_)
                | GatewayError::SendFailed(_)
                | GatewayError::StoreRead { .. }
                | GatewayError::StoreWrite { .. }
                | GatewayError::Io(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::DriverInstallFailed(_) => "DRIVER_INSTALL_FAILED",
            GatewayError::DriverStartFailed(_) => "DRIVER_START_FAILED",
            GatewayError::AlertConfigFailed(_) => "ALERT_CONFIG_FAILED",
            GatewayError::BusRead(_) => "BUS_READ",
            GatewayError::BusClosed => "BUS_CLOSED",
            GatewayError::SendFailed(_) => "SEND_FAILED",
            GatewayError::PeerRegistrationFailed { .. } => "PEER_REGISTRATION_FAILED",
            GatewayError::StoreRead { .. } => "STORE_READ",
            GatewayError::StoreWrite { .. } => "STORE_WRITE",
            GatewayError::UpdateFailed(_) => "UPDATE_FAILED",
            GatewayError::Frame(e) => e.error_code(),
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::ChannelClosed => "CHANNEL_CLOSED",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

// Conversion from tokio mpsc send error
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::ChannelClosed
    }
}
