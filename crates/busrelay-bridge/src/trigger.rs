//! Remote update trigger
//!
//! A trigger frame carries three address bytes. Every device on the bus sees
//! it; only the one whose host name is `<prefix>-XXXXXX` for those bytes acts
//! on it. For that device the stored network credential is looked up, and if
//! present the gateway hands control to the update subsystem.

use busrelay_core::{target_host_name, BusFrame, ADDRESS_FRAGMENT_LEN};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::credential::{load_credential, Credential};
use crate::interface::CredentialStore;

/// Whether a trigger frame addresses this device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    /// The frame names this device
    Matched,
    /// The frame names another device
    Mismatch {
        /// Host name the frame addressed
        target: String,
    },
    /// Fewer than three address bytes
    TooShort {
        /// Payload length received
        len: usize,
    },
}

/// What the gateway should do after a trigger frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// Hand off to the update subsystem with this credential
    EnterUpdate(Credential),
    /// Nothing further; the outcome is final
    Done(TriggerOutcome),
}

/// Final outcome of a trigger frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Addressed to another device
    NotForUs {
        /// Host name the frame addressed
        target: String,
    },
    /// Frame too short to carry an address
    TooShort {
        /// Payload length received
        len: usize,
    },
    /// Addressed to us but no usable credential is stored
    MissingCredential,
    /// The update session ran and returned
    UpdateCompleted,
    /// The update subsystem reported an error
    UpdateFailed(String),
}

/// Matches trigger frames against this device's host name
#[derive(Debug, Clone)]
pub struct UpdateTrigger {
    prefix: String,
    host_name: String,
}

impl UpdateTrigger {
    /// Create a trigger matcher for the given host name
    pub fn new(prefix: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            host_name: host_name.into(),
        }
    }

    /// This device's host name
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Host name a trigger payload addresses, if it carries an address
    pub fn target_of(&self, payload: &[u8]) -> Option<String> {
        let fragment: [u8; ADDRESS_FRAGMENT_LEN] =
            payload.get(..ADDRESS_FRAGMENT_LEN)?.try_into().ok()?;
        Some(target_host_name(&self.prefix, fragment))
    }

    /// Decide whether a trigger frame addresses this device
    pub fn evaluate(&self, frame: &BusFrame) -> TriggerDecision {
        match self.target_of(frame.payload()) {
            None => TriggerDecision::TooShort { len: frame.len() },
            Some(target) if target == self.host_name => TriggerDecision::Matched,
            Some(target) => TriggerDecision::Mismatch { target },
        }
    }

    /// Evaluate a trigger frame and, on a match, fetch the stored credential
    ///
    /// The store is only consulted when the frame addresses this device.
    pub async fn handle<S>(&self, frame: &BusFrame, store: &S, layout: &StoreConfig) -> TriggerAction
    where
        S: CredentialStore + ?Sized,
    {
        info!(payload = %frame.payload_hex(), "Update trigger received");

        match self.evaluate(frame) {
            TriggerDecision::TooShort { len } => {
                warn!(len, "Update trigger too short to carry an address, ignoring");
                TriggerAction::Done(TriggerOutcome::TooShort { len })
            }
            TriggerDecision::Mismatch { target } => {
                debug!(
                    target = %target,
                    host_name = %self.host_name,
                    "Update trigger addressed to another device"
                );
                TriggerAction::Done(TriggerOutcome::NotForUs { target })
            }
            TriggerDecision::Matched => {
                info!(host_name = %self.host_name, "Update trigger matched this device");
                match load_credential(store, layout).await {
                    Ok(Some(credential)) if credential.is_usable() => {
                        TriggerAction::EnterUpdate(credential)
                    }
                    Ok(_) => {
                        error!("No stored network credential; cannot enter update mode");
                        TriggerAction::Done(TriggerOutcome::MissingCredential)
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            code = e.error_code(),
                            "Failed to read stored credential; cannot enter update mode"
                        );
                        TriggerAction::Done(TriggerOutcome::MissingCredential)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UPDATE_TRIGGER_ID;
    use crate::test_utils::MemoryStore;

    fn trigger_frame(payload: &[u8]) -> BusFrame {
        BusFrame::new(UPDATE_TRIGGER_ID, payload).unwrap()
    }

    #[test]
    fn test_evaluate_match() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        assert_eq!(
            trigger.evaluate(&trigger_frame(&[0xA1, 0xB2, 0xC3])),
            TriggerDecision::Matched
        );
    }

    #[test]
    fn test_evaluate_ignores_extra_bytes() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        assert_eq!(
            trigger.evaluate(&trigger_frame(&[0xA1, 0xB2, 0xC3, 0xFF, 0xEE])),
            TriggerDecision::Matched
        );
    }

    #[test]
    fn test_evaluate_mismatch() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        assert_eq!(
            trigger.evaluate(&trigger_frame(&[0x00, 0x00, 0x00])),
            TriggerDecision::Mismatch {
                target: "dev-000000".to_string()
            }
        );
    }

    #[test]
    fn test_evaluate_is_case_sensitive() {
        let trigger = UpdateTrigger::new("dev", "dev-a1b2c3");
        assert!(matches!(
            trigger.evaluate(&trigger_frame(&[0xA1, 0xB2, 0xC3])),
            TriggerDecision::Mismatch { .. }
        ));
    }

    #[test]
    fn test_evaluate_too_short() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        assert_eq!(
            trigger.evaluate(&trigger_frame(&[0xA1, 0xB2])),
            TriggerDecision::TooShort { len: 2 }
        );
    }

    #[tokio::test]
    async fn test_mismatch_skips_store() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        let store = MemoryStore::with_entries(&[("wifi", "ssid", "camp"), ("wifi", "password", "pw")]);

        let action = trigger
            .handle(&trigger_frame(&[0, 0, 0]), &store, &StoreConfig::default())
            .await;

        assert!(matches!(
            action,
            TriggerAction::Done(TriggerOutcome::NotForUs { .. })
        ));
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn test_match_reads_credential() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        let store = MemoryStore::with_entries(&[("wifi", "ssid", "camp"), ("wifi", "password", "pw")]);

        let action = trigger
            .handle(&trigger_frame(&[0xA1, 0xB2, 0xC3]), &store, &StoreConfig::default())
            .await;

        assert_eq!(
            action,
            TriggerAction::EnterUpdate(Credential::new("camp", "pw"))
        );
        assert!(store.read_count() > 0);
    }

    #[tokio::test]
    async fn test_match_without_credential() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        let store = MemoryStore::new();

        let action = trigger
            .handle(&trigger_frame(&[0xA1, 0xB2, 0xC3]), &store, &StoreConfig::default())
            .await;

        assert_eq!(action, TriggerAction::Done(TriggerOutcome::MissingCredential));
        assert!(store.read_count() > 0);
    }

    #[tokio::test]
    async fn test_match_with_empty_name() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        let store = MemoryStore::with_entries(&[("wifi", "ssid", ""), ("wifi", "password", "pw")]);

        let action = trigger
            .handle(&trigger_frame(&[0xA1, 0xB2, 0xC3]), &store, &StoreConfig::default())
            .await;

        assert_eq!(action, TriggerAction::Done(TriggerOutcome::MissingCredential));
    }

    #[tokio::test]
    async fn test_store_failure_counts_as_missing() {
        let trigger = UpdateTrigger::new("dev", "dev-A1B2C3");
        let store = MemoryStore::new();
        store.fail_reads(true);

        let action = trigger
            .handle(&trigger_frame(&[0xA1, 0xB2, 0xC3]), &store, &StoreConfig::default())
            .await;

        assert_eq!(action, TriggerAction::Done(TriggerOutcome::MissingCredential));
    }
}
