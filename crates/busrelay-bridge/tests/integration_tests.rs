//! Integration tests for the relay gateway
//!
//! These tests drive a full `GatewayBridge` over the in-memory collaborators:
//! - Forwarding of ordinary frames and the relay wire layout
//! - Credential provisioning, including every rejection path
//! - Remote update triggers and the mode machine
//! - Poll loop behaviour (drain-to-empty, driver failure, shutdown)

use busrelay_bridge::test_utils::{
    MemoryStore, MockRelay, StartFailure, TestFixture, TEST_ADDRESS_FRAGMENT, TEST_HOST_NAME,
};
use busrelay_bridge::{
    xor_checksum, BusAlerts, CommitResult, Dispatched, DriverState, FrameRoute, GatewayMode,
    ProvisioningEvent, ProvisioningPhase, ProvisioningRejection, SendStatus, TriggerAction,
    TriggerOutcome, PROVISIONING_ID, UPDATE_TRIGGER_ID, VERSION,
};
use busrelay_core::{BusFrame, MacAddress, RelayRecord, RELAY_RECORD_SIZE};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn frame(identifier: u32, payload: &[u8]) -> BusFrame {
    BusFrame::new(identifier, payload).unwrap()
}

fn start(name_len: u8, secret_len: u8) -> BusFrame {
    frame(PROVISIONING_ID, &[1, name_len, secret_len])
}

fn name_chunk(bytes: &[u8]) -> BusFrame {
    let mut payload = vec![2, 0];
    payload.extend_from_slice(bytes);
    frame(PROVISIONING_ID, &payload)
}

fn secret_chunk(bytes: &[u8]) -> BusFrame {
    let mut payload = vec![3, 0];
    payload.extend_from_slice(bytes);
    frame(PROVISIONING_ID, &payload)
}

fn end(checksum: u8) -> BusFrame {
    frame(PROVISIONING_ID, &[4, checksum])
}

fn provisioning_frames(name: &[u8], secret: &[u8], checksum: u8) -> Vec<BusFrame> {
    let mut frames = vec![start(name.len() as u8, secret.len() as u8)];
    frames.extend(name.chunks(6).map(name_chunk));
    frames.extend(secret.chunks(6).map(secret_chunk));
    frames.push(end(checksum));
    frames
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn test_forwarding_identity() {
    let fixture = TestFixture::new();
    for len in 0..=8u8 {
        let payload: Vec<u8> = (0..len).map(|i| 0x10 + i).collect();
        fixture.bus.queue_frame(frame(0x100 + u32::from(len), &payload));
    }
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;
    bridge.poll_once().await;

    let sent = fixture.relay.sent();
    assert_eq!(sent.len(), 9);
    for (len, record) in sent.iter().enumerate() {
        assert_eq!(record.identifier, 0x100 + len as u32);
        assert_eq!(record.data_length as usize, len);
        assert_eq!(
            record.payload(),
            (0..len as u8).map(|i| 0x10 + i).collect::<Vec<_>>().as_slice()
        );
        assert!(record.data[len..].iter().all(|b| *b == 0));
    }
}

#[tokio::test]
async fn test_dirty_controller_slots_are_not_relayed() {
    let fixture = TestFixture::with_frames([BusFrame::from_raw(
        0x2A0,
        false,
        2,
        [1, 2, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE],
    )]);
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;
    bridge.poll_once().await;

    assert_eq!(fixture.relay.sent()[0].data, [1, 2, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_relay_wire_encoding() {
    let record = RelayRecord {
        identifier: 0x0000_0123,
        data_length: 3,
        data: [0xAA, 0xBB, 0xCC, 0, 0, 0, 0, 0],
    };
    let encoded = record.encode();

    assert_eq!(encoded.len(), RELAY_RECORD_SIZE);
    assert_eq!(&encoded[0..4], &[0x23, 0x01, 0x00, 0x00]);
    assert_eq!(encoded[4], 3);
    assert_eq!(&encoded[5..13], &[0xAA, 0xBB, 0xCC, 0, 0, 0, 0, 0]);
    assert_eq!(&encoded[13..16], &[0, 0, 0]);
    assert_eq!(RelayRecord::decode(&encoded).unwrap(), record);
}

#[tokio::test]
async fn test_send_failures_are_counted_not_retried() {
    let fixture = TestFixture::with_frames([frame(0x300, &[1]), frame(0x301, &[2])]);
    fixture.relay.fail_sends(true);
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;

    assert_eq!(bridge.poll_once().await, 2);
    assert_eq!(fixture.relay.attempts(), 2);
    assert_eq!(bridge.stats().send_failures, 2);
    assert_eq!(bridge.stats().frames_forwarded, 0);
}

#[tokio::test]
async fn test_send_result_callback_sees_every_outcome() {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    let peer: MacAddress = "24:6F:28:AA:BB:CC".parse().unwrap();

    let mut fixture = TestFixture::with_frames([frame(0x400, &[9])]);
    fixture.relay = MockRelay::with_peer(peer).with_callback(Arc::new(
        move |to: MacAddress, status: SendStatus| {
            sink.lock().push((to, status));
        },
    ));
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;
    bridge.poll_once().await;

    assert_eq!(*outcomes.lock(), vec![(peer, SendStatus::Delivered)]);
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_provisioning_success() {
    let fixture = TestFixture::with_frames(provisioning_frames(
        b"alice",
        b"xyz",
        xor_checksum(b"alice", b"xyz"),
    ));
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;
    bridge.poll_once().await;

    assert_eq!(fixture.store.value("wifi", "ssid").as_deref(), Some("alice"));
    assert_eq!(fixture.store.value("wifi", "password").as_deref(), Some("xyz"));
    assert_eq!(bridge.session().phase(), ProvisioningPhase::Idle);
    assert_eq!(bridge.stats().credentials_committed, 1);
    assert!(fixture.relay.sent().is_empty());
}

#[tokio::test]
async fn test_provisioning_maximum_lengths() {
    let name = [b'n'; 32];
    let secret = [b's'; 63];
    let fixture = TestFixture::with_frames(provisioning_frames(
        &name,
        &secret,
        xor_checksum(&name, &secret),
    ));
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;
    bridge.poll_once().await;

    assert_eq!(fixture.store.value("wifi", "ssid").map(|s| s.len()), Some(32));
    assert_eq!(fixture.store.value("wifi", "password").map(|s| s.len()), Some(63));
}

#[tokio::test]
async fn test_provisioning_checksum_failure() {
    let fixture = TestFixture::new();
    let (mut bridge, _handle) = fixture.bridge();

    let mut last = None;
    for f in provisioning_frames(b"alice", b"xyz", xor_checksum(b"alice", b"xyz") ^ 0x01) {
        last = Some(bridge.handle_frame(&f).await);
    }

    assert!(matches!(
        last,
        Some(Dispatched::Provisioning {
            event: ProvisioningEvent::Rejected(ProvisioningRejection::ChecksumMismatch { .. }),
            commit: None,
        })
    ));
    assert_eq!(fixture.store.write_count(), 0);
    assert_eq!(bridge.session().phase(), ProvisioningPhase::Idle);
    assert_eq!(bridge.stats().provisioning_rejections, 1);
}

#[tokio::test]
async fn test_provisioning_length_failure() {
    let fixture = TestFixture::new();
    let (mut bridge, _handle) = fixture.bridge();

    // Checksum is computed over what was actually sent, so only the length check can fail
    let frames = [
        start(5, 3),
        name_chunk(b"ali"),
        secret_chunk(b"xyz"),
        end(xor_checksum(b"ali", b"xyz")),
    ];
    let mut last = None;
    for f in &frames {
        last = Some(bridge.handle_frame(f).await);
    }

    assert!(matches!(
        last,
        Some(Dispatched::Provisioning {
            event: ProvisioningEvent::Rejected(ProvisioningRejection::LengthMismatch { .. }),
            ..
        })
    ));
    assert_eq!(fixture.store.write_count(), 0);
    assert_eq!(bridge.session().phase(), ProvisioningPhase::Idle);
}

#[tokio::test]
async fn test_chunk_overflow_is_truncated() {
    let fixture = TestFixture::new();
    let (mut bridge, _handle) = fixture.bridge();

    bridge.handle_frame(&start(4, 2)).await;
    bridge.handle_frame(&name_chunk(b"abcdef")).await;
    bridge.handle_frame(&secret_chunk(b"123456")).await;

    assert_eq!(bridge.session().received_name(), b"abcd");
    assert_eq!(bridge.session().received_secret(), b"12");

    bridge.handle_frame(&end(xor_checksum(b"abcd", b"12"))).await;
    assert_eq!(fixture.store.value("wifi", "ssid").as_deref(), Some("abcd"));
    assert_eq!(fixture.store.value("wifi", "password").as_deref(), Some("12"));
}

#[tokio::test]
async fn test_restart_discards_partial_session() {
    let fixture = TestFixture::new();
    let (mut bridge, _handle) = fixture.bridge();

    bridge.handle_frame(&start(3, 1)).await;
    bridge.handle_frame(&name_chunk(b"old")).await;

    for f in provisioning_frames(b"new", b"k", xor_checksum(b"new", b"k")) {
        bridge.handle_frame(&f).await;
    }

    assert_eq!(fixture.store.value("wifi", "ssid").as_deref(), Some("new"));
}

#[tokio::test]
async fn test_store_failure_still_resets_session() {
    let fixture = TestFixture::new();
    fixture.store.fail_writes(true);
    let (mut bridge, _handle) = fixture.bridge();

    let mut last = None;
    for f in provisioning_frames(b"net", b"pw", xor_checksum(b"net", b"pw")) {
        last = Some(bridge.handle_frame(&f).await);
    }

    assert!(matches!(
        last,
        Some(Dispatched::Provisioning {
            commit: Some(CommitResult::StoreFailed(_)),
            ..
        })
    ));
    assert_eq!(bridge.session().phase(), ProvisioningPhase::Idle);
    assert_eq!(bridge.stats().commit_failures, 1);
}

#[tokio::test]
async fn test_failed_secret_write_keeps_previous_credential() {
    let fixture = TestFixture::with_credential("oldnet", "oldpw");
    fixture.store.fail_writes_to("password");
    let (mut bridge, _handle) = fixture.bridge();

    let mut last = None;
    for f in provisioning_frames(b"alice", b"xyz", xor_checksum(b"alice", b"xyz")) {
        last = Some(bridge.handle_frame(&f).await);
    }

    assert!(matches!(
        last,
        Some(Dispatched::Provisioning {
            commit: Some(CommitResult::StoreFailed(_)),
            ..
        })
    ));
    assert_eq!(fixture.store.value("wifi", "ssid").as_deref(), Some("oldnet"));
    assert_eq!(fixture.store.value("wifi", "password").as_deref(), Some("oldpw"));

    // A later trigger still sees a consistent pair
    bridge.handle_frame(&TestFixture::trigger_frame()).await;
    let calls = fixture.updater.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "oldnet");
    assert_eq!(calls[0].secret, "oldpw");
}

// ============================================================================
// Update trigger
// ============================================================================

#[tokio::test]
async fn test_trigger_match_attempts_lookup() {
    let fixture = TestFixture::with_credential("camp", "pw");
    let (mut bridge, _handle) = fixture.bridge();
    assert_eq!(bridge.host_name(), TEST_HOST_NAME);

    let result = bridge
        .handle_frame(&frame(UPDATE_TRIGGER_ID, &TEST_ADDRESS_FRAGMENT))
        .await;

    assert!(fixture.store.read_count() > 0);
    assert_eq!(
        result,
        Dispatched::Trigger(TriggerAction::Done(TriggerOutcome::UpdateCompleted))
    );
    assert_eq!(fixture.updater.calls().len(), 1);
    assert_eq!(bridge.mode(), GatewayMode::Bridging);
}

#[tokio::test]
async fn test_trigger_mismatch_skips_lookup() {
    let fixture = TestFixture::with_credential("camp", "pw");
    let (mut bridge, _handle) = fixture.bridge();

    let result = bridge
        .handle_frame(&frame(UPDATE_TRIGGER_ID, &[0x00, 0x00, 0x00]))
        .await;

    assert_eq!(fixture.store.read_count(), 0);
    assert!(matches!(
        result,
        Dispatched::Trigger(TriggerAction::Done(TriggerOutcome::NotForUs { .. }))
    ));
    assert!(fixture.updater.calls().is_empty());
    assert_eq!(bridge.mode(), GatewayMode::Bridging);
}

#[tokio::test]
async fn test_trigger_missing_credential() {
    let fixture = TestFixture::new();
    let (mut bridge, _handle) = fixture.bridge();

    let result = bridge.handle_frame(&TestFixture::trigger_frame()).await;

    assert_eq!(
        result,
        Dispatched::Trigger(TriggerAction::Done(TriggerOutcome::MissingCredential))
    );
    assert!(fixture.updater.calls().is_empty());
}

#[tokio::test]
async fn test_provisioned_credential_reaches_updater() {
    let mut frames = provisioning_frames(b"field", b"s3cret", xor_checksum(b"field", b"s3cret"));
    frames.push(TestFixture::trigger_frame());
    let fixture = TestFixture::with_frames(frames);
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;
    bridge.poll_once().await;

    let calls = fixture.updater.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "field");
    assert_eq!(calls[0].secret, "s3cret");
    assert_eq!(calls[0].timeout, Duration::from_secs(180));
}

#[tokio::test]
async fn test_frames_after_update_are_still_drained() {
    let fixture = TestFixture::with_credential("camp", "pw");
    fixture
        .bus
        .queue_frames([TestFixture::trigger_frame(), frame(0x500, &[1])]);
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;

    assert_eq!(bridge.poll_once().await, 2);
    assert_eq!(fixture.relay.sent().len(), 1);
}

// ============================================================================
// Dispatch and poll loop
// ============================================================================

#[tokio::test]
async fn test_dispatch_exclusivity() {
    let fixture = TestFixture::with_credential("camp", "pw");
    let (mut bridge, _handle) = fixture.bridge();

    let frames = [
        frame(0x0, &[0, 0, 0]),
        frame(0x1, &[1, 1, 1]),
        frame(0x2, &[]),
        frame(0x123, &[1, 2, 3]),
        frame(0x1ABC_DEF0, &[4]),
    ];

    for f in &frames {
        let result = bridge.handle_frame(f).await;
        assert_eq!(result.route(), FrameRoute::classify(f));
    }

    let forwarded: Vec<u32> = fixture.relay.sent().iter().map(|r| r.identifier).collect();
    assert_eq!(forwarded, vec![0x2, 0x123, 0x1ABC_DEF0]);
    assert_eq!(fixture.store.write_count(), 0);
}

#[tokio::test]
async fn test_drain_to_empty_on_single_alert() {
    let fixture = TestFixture::with_frames((0..20).map(|i| frame(0x600 + i, &[i as u8])));
    fixture.bus.push_alerts(BusAlerts::RX_DATA);
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;

    assert_eq!(bridge.poll_once().await, 20);
    assert_eq!(fixture.bus.pending(), 0);
    assert_eq!(fixture.bus.wait_count(), 1);
}

#[tokio::test]
async fn test_alerts_are_counted() {
    let fixture = TestFixture::new();
    fixture
        .bus
        .push_alerts(BusAlerts::ERR_PASS | BusAlerts::BUS_ERROR | BusAlerts::RX_QUEUE_FULL);
    let (mut bridge, _handle) = fixture.bridge();
    bridge.start().await;
    bridge.poll_once().await;

    let stats = bridge.stats();
    assert_eq!(stats.error_passive_alerts, 1);
    assert_eq!(stats.bus_error_alerts, 1);
    assert_eq!(stats.queue_full_alerts, 1);
}

#[tokio::test]
async fn test_driver_disabled_never_forwards() {
    let fixture = TestFixture::with_frames([frame(0x700, &[1]), frame(0x701, &[2])]);
    fixture.bus.fail_start(StartFailure::Alerts);
    fixture.bus.close();
    let (bridge, handle) = fixture.bridge();

    let task = tokio::spawn(bridge.run());
    for _ in 0..3 {
        assert_eq!(handle.stats().await.unwrap().frames_received, 0);
    }
    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert!(fixture.relay.sent().is_empty());
    assert_eq!(fixture.bus.receive_count(), 0);
    assert!(fixture.bus.started_with().is_none());
}

#[tokio::test]
async fn test_start_reports_driver_state() {
    let fixture = TestFixture::new();
    fixture.bus.fail_start(StartFailure::Start);
    let (mut bridge, _handle) = fixture.bridge();

    match bridge.start().await {
        DriverState::Disabled { reason } => assert!(reason.contains("start")),
        other => panic!("expected disabled driver, got {:?}", other),
    }
}

#[tokio::test]
async fn test_run_until_bus_exhausted() {
    let fixture = TestFixture::with_frames(
        provisioning_frames(b"net", b"pw", xor_checksum(b"net", b"pw"))
            .into_iter()
            .chain([frame(0x10, &[1, 2]), frame(0x11, &[3])]),
    );
    fixture.bus.close();
    let (bridge, _handle) = fixture.bridge();

    bridge.run().await.unwrap();

    assert_eq!(fixture.relay.sent().len(), 2);
    assert_eq!(fixture.store.value("wifi", "ssid").as_deref(), Some("net"));
}

#[tokio::test]
async fn test_independent_store_instance() {
    let store = MemoryStore::with_entries(&[("wifi", "ssid", "a"), ("wifi", "password", "b")]);
    let mut fixture = TestFixture::new();
    fixture.store = store.clone();
    let (mut bridge, _handle) = fixture.bridge();

    bridge.handle_frame(&TestFixture::trigger_frame()).await;
    assert!(store.read_count() > 0);
}

#[test]
fn test_version() {
    assert!(!VERSION.is_empty());
}
