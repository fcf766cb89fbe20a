//! Inbound frame classification and routing
//!
//! Every frame goes to exactly one place, chosen by identifier:
//!
//! | identifier | route |
//! |------------|-------|
//! | `0x0` | update trigger, never forwarded |
//! | `0x1` | provisioning session, never forwarded |
//! | anything else | translated and relayed verbatim |

use busrelay_core::{BusFrame, RelayRecord};
use tracing::{debug, error, info, warn};

use crate::config::{StoreConfig, PROVISIONING_ID, UPDATE_TRIGGER_ID};
use crate::credential::save_credential;
use crate::interface::{CredentialStore, RelayInterface, SendStatus};
use crate::provisioning::{ProvisioningEvent, ProvisioningSession};
use crate::translator::FrameTranslator;
use crate::trigger::{TriggerAction, UpdateTrigger};

/// Where a frame is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRoute {
    /// Update trigger handler
    UpdateTrigger,
    /// Provisioning state machine
    Provisioning,
    /// Translate and relay over the wireless transport
    Forward,
}

impl FrameRoute {
    /// Classify a frame by identifier
    pub fn classify(frame: &BusFrame) -> Self {
        match frame.identifier {
            UPDATE_TRIGGER_ID => FrameRoute::UpdateTrigger,
            PROVISIONING_ID => FrameRoute::Provisioning,
            _ => FrameRoute::Forward,
        }
    }
}

/// Result of persisting a validated credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// Both halves written
    Stored,
    /// The store rejected the write
    StoreFailed(String),
}

/// The single action taken for a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Frame was relayed
    Forwarded {
        /// Record handed to the relay
        record: RelayRecord,
        /// Whether the relay accepted it
        status: SendStatus,
    },
    /// Frame was fed to the provisioning session
    Provisioning {
        /// What the session did with it
        event: ProvisioningEvent,
        /// Store result when the frame completed a session
        commit: Option<CommitResult>,
    },
    /// Frame was evaluated as an update trigger
    Trigger(TriggerAction),
}

impl Dispatched {
    /// The route this action belongs to
    pub fn route(&self) -> FrameRoute {
        match self {
            Dispatched::Forwarded { .. } => FrameRoute::Forward,
            Dispatched::Provisioning { .. } => FrameRoute::Provisioning,
            Dispatched::Trigger(_) => FrameRoute::UpdateTrigger,
        }
    }
}

/// Routes frames to the translator, provisioning session, or update trigger
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    translator: FrameTranslator,
    trigger: UpdateTrigger,
    store_layout: StoreConfig,
}

impl MessageDispatcher {
    /// Create a dispatcher for a device identified by `trigger`
    pub fn new(trigger: UpdateTrigger, store_layout: StoreConfig) -> Self {
        Self {
            translator: FrameTranslator::new(),
            trigger,
            store_layout,
        }
    }

    /// The update trigger matcher
    pub fn trigger(&self) -> &UpdateTrigger {
        &self.trigger
    }

    /// Route one frame and perform its single downstream action
    ///
    /// The provisioning session is only touched for provisioning frames; the
    /// store is only written when a session completes and only read when a
    /// trigger addresses this device.
    pub async fn dispatch<R, S>(
        &self,
        frame: &BusFrame,
        session: &mut ProvisioningSession,
        relay: &mut R,
        store: &mut S,
    ) -> Dispatched
    where
        R: RelayInterface + ?Sized,
        S: CredentialStore + ?Sized,
    {
        debug!(
            identifier = format_args!("0x{:03X}", frame.identifier),
            dlc = frame.data_length,
            data = %frame.payload_hex(),
            "Frame received"
        );

        match FrameRoute::classify(frame) {
            FrameRoute::UpdateTrigger => {
                let action = self.trigger.handle(frame, &*store, &self.store_layout).await;
                Dispatched::Trigger(action)
            }
            FrameRoute::Provisioning => {
                let event = session.handle_frame(frame);
                let commit = match &event {
                    ProvisioningEvent::Complete(credential) => {
                        Some(match save_credential(store, &self.store_layout, credential).await {
                            Ok(()) => {
                                info!(name = %credential.name, "Network credential committed");
                                CommitResult::Stored
                            }
                            Err(e) => {
                                error!(
                                    error = %e,
                                    code = e.error_code(),
                                    "Failed to commit network credential"
                                );
                                CommitResult::StoreFailed(e.to_string())
                            }
                        })
                    }
                    _ => None,
                };
                Dispatched::Provisioning { event, commit }
            }
            FrameRoute::Forward => {
                let record = self.translator.translate(frame);
                let status = match relay.broadcast(&record).await {
                    Ok(()) => {
                        debug!(
                            identifier = format_args!("0x{:03X}", record.identifier),
                            relay = relay.name(),
                            "Frame relayed"
                        );
                        SendStatus::Delivered
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            code = e.error_code(),
                            identifier = format_args!("0x{:03X}", record.identifier),
                            "Relay send failed, dropping frame"
                        );
                        SendStatus::Failed
                    }
                };
                Dispatched::Forwarded { record, status }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{xor_checksum, ProvisioningPhase};
    use crate::test_utils::{MemoryStore, MockRelay};
    use crate::trigger::TriggerOutcome;

    fn dispatcher() -> MessageDispatcher {
        MessageDispatcher::new(
            UpdateTrigger::new("dev", "dev-A1B2C3"),
            StoreConfig::default(),
        )
    }

    fn frame(identifier: u32, payload: &[u8]) -> BusFrame {
        BusFrame::new(identifier, payload).unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(FrameRoute::classify(&frame(0x0, &[])), FrameRoute::UpdateTrigger);
        assert_eq!(FrameRoute::classify(&frame(0x1, &[])), FrameRoute::Provisioning);
        assert_eq!(FrameRoute::classify(&frame(0x2, &[])), FrameRoute::Forward);
        assert_eq!(FrameRoute::classify(&frame(0x100, &[])), FrameRoute::Forward);
        assert_eq!(
            FrameRoute::classify(&frame(0x1000_0001, &[])),
            FrameRoute::Forward
        );
    }

    #[tokio::test]
    async fn test_forward_reaches_relay_only() {
        let dispatcher = dispatcher();
        let mut session = ProvisioningSession::new();
        let mut relay = MockRelay::new();
        let mut store = MemoryStore::new();

        let result = dispatcher
            .dispatch(&frame(0x321, &[1, 2, 3]), &mut session, &mut relay, &mut store)
            .await;

        assert_eq!(result.route(), FrameRoute::Forward);
        assert_eq!(relay.sent().len(), 1);
        assert_eq!(relay.sent()[0].payload(), &[1, 2, 3]);
        assert_eq!(store.read_count(), 0);
        assert_eq!(store.write_count(), 0);
        assert_eq!(session.phase(), ProvisioningPhase::Idle);
    }

    #[tokio::test]
    async fn test_send_failure_is_reported_not_raised() {
        let dispatcher = dispatcher();
        let mut session = ProvisioningSession::new();
        let mut relay = MockRelay::new();
        relay.fail_sends(true);
        let mut store = MemoryStore::new();

        let result = dispatcher
            .dispatch(&frame(0x10, &[9]), &mut session, &mut relay, &mut store)
            .await;

        assert!(matches!(
            result,
            Dispatched::Forwarded {
                status: SendStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_provisioning_frames_are_not_forwarded() {
        let dispatcher = dispatcher();
        let mut session = ProvisioningSession::new();
        let mut relay = MockRelay::new();
        let mut store = MemoryStore::new();

        let frames = [
            frame(0x1, &[1, 2, 1]),
            frame(0x1, &[2, 0, b'o', b'k']),
            frame(0x1, &[3, 0, b'z']),
            frame(0x1, &[4, xor_checksum(b"ok", b"z")]),
        ];

        let mut last = None;
        for f in &frames {
            let result = dispatcher.dispatch(f, &mut session, &mut relay, &mut store).await;
            assert_eq!(result.route(), FrameRoute::Provisioning);
            last = Some(result);
        }

        assert!(matches!(
            last,
            Some(Dispatched::Provisioning {
                commit: Some(CommitResult::Stored),
                ..
            })
        ));
        assert!(relay.sent().is_empty());
        assert_eq!(store.value("wifi", "ssid").as_deref(), Some("ok"));
        assert_eq!(store.value("wifi", "password").as_deref(), Some("z"));
    }

    #[tokio::test]
    async fn test_commit_store_failure_is_reported() {
        let dispatcher = dispatcher();
        let mut session = ProvisioningSession::new();
        let mut relay = MockRelay::new();
        let mut store = MemoryStore::new();
        store.fail_writes(true);

        dispatcher
            .dispatch(&frame(0x1, &[1, 1, 0]), &mut session, &mut relay, &mut store)
            .await;
        dispatcher
            .dispatch(&frame(0x1, &[2, 0, b'n']), &mut session, &mut relay, &mut store)
            .await;
        let result = dispatcher
            .dispatch(&frame(0x1, &[4, b'n']), &mut session, &mut relay, &mut store)
            .await;

        assert!(matches!(
            result,
            Dispatched::Provisioning {
                commit: Some(CommitResult::StoreFailed(_)),
                ..
            }
        ));
        assert_eq!(session.phase(), ProvisioningPhase::Idle);
    }

    #[tokio::test]
    async fn test_trigger_frames_are_not_forwarded() {
        let dispatcher = dispatcher();
        let mut session = ProvisioningSession::new();
        let mut relay = MockRelay::new();
        let mut store = MemoryStore::new();

        let result = dispatcher
            .dispatch(&frame(0x0, &[0, 0, 0]), &mut session, &mut relay, &mut store)
            .await;

        assert_eq!(
            result,
            Dispatched::Trigger(TriggerAction::Done(TriggerOutcome::NotForUs {
                target: "dev-000000".to_string()
            }))
        );
        assert!(relay.sent().is_empty());
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn test_exactly_one_action_per_frame() {
        let dispatcher = dispatcher();
        let mut session = ProvisioningSession::new();
        let mut relay = MockRelay::new();
        let mut store = MemoryStore::new();

        let frames = [
            frame(0x0, &[0xA1]),
            frame(0x1, &[7]),
            frame(0x2, &[]),
            frame(0x7FF, &[1, 2, 3, 4, 5, 6, 7, 8]),
            frame(0x0, &[1, 2, 3]),
            frame(0x1, &[]),
        ];

        let mut forwarded = 0;
        for f in &frames {
            let result = dispatcher.dispatch(f, &mut session, &mut relay, &mut store).await;
            assert_eq!(result.route(), FrameRoute::classify(f));
            if result.route() == FrameRoute::Forward {
                forwarded += 1;
            }
        }

        assert_eq!(forwarded, 2);
        assert_eq!(relay.sent().len(), 2);
    }
}
