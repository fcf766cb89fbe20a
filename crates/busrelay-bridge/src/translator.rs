//! Translation of bus frames into relay records
//!
//! Bus frames carry between zero and eight data bytes. The wireless transport
//! wants a fixed-width record, so the translator copies the identifier and
//! length verbatim, copies the meaningful bytes, and zero-fills the rest.
//!
//! Slots past the data length are always zero, even when the controller left
//! stale bytes in its receive buffer.

use busrelay_core::{BusFrame, RelayRecord, MAX_DATA_LEN};
use tracing::trace;

/// Stateless bus frame to relay record translator
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTranslator;

impl FrameTranslator {
    /// Create a new translator
    pub fn new() -> Self {
        Self
    }

    /// Build the relay record for a frame
    ///
    /// A data length above 8 is a driver contract violation and is clamped.
    pub fn translate(&self, frame: &BusFrame) -> RelayRecord {
        let len = (frame.data_length as usize).min(MAX_DATA_LEN);

        let mut data = [0u8; MAX_DATA_LEN];
        data[..len].copy_from_slice(&frame.data[..len]);

        trace!(
            identifier = frame.identifier,
            data_length = frame.data_length,
            "Translated frame into relay record"
        );

        RelayRecord {
            identifier: frame.identifier,
            data_length: len as u8,
            data,
        }
    }
}
