//! Error types for bus frame and relay record handling

use thiserror::Error;

/// Errors raised while building or decoding wire types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Bus frames carry at most 8 data bytes
    #[error("Payload too long: {len} bytes exceeds bus maximum of {max} bytes")]
    PayloadTooLong {
        /// Offered payload length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Identifier does not fit the 29-bit extended address space
    #[error("Identifier 0x{0:08X} exceeds the 29-bit bus address space")]
    IdentifierOutOfRange(u32),

    /// Relay record buffer too short or inconsistent
    #[error("Invalid relay record: {0}")]
    InvalidRecord(String),

    /// Text form of a frame could not be parsed
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// MAC address string could not be parsed
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
}

impl CoreError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::PayloadTooLong { .. } => "PAYLOAD_TOO_LONG",
            CoreError::IdentifierOutOfRange(_) => "IDENTIFIER_OUT_OF_RANGE",
            CoreError::InvalidRecord(_) => "INVALID_RECORD",
            CoreError::MalformedFrame(_) => "MALFORMED_FRAME",
            CoreError::InvalidMac(_) => "INVALID_MAC",
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
