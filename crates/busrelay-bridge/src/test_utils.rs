//! In-memory collaborators for testing without hardware
//!
//! Each mock keeps its state behind an `Arc<Mutex<_>>`, so a test can hand a
//! clone to the bridge and keep another clone to script inputs and inspect
//! what happened.
//!
//! # Example
//!
//! ```rust,ignore
//! use busrelay_bridge::test_utils::TestFixture;
//! use busrelay_core::BusFrame;
//!
//! let fixture = TestFixture::new();
//! fixture.bus.queue_frame(BusFrame::new(0x123, &[1, 2, 3]).unwrap());
//!
//! let (mut bridge, _handle) = fixture.bridge();
//! bridge.start().await;
//! bridge.poll_once().await;
//!
//! assert_eq!(fixture.relay.sent().len(), 1);
//! ```

use async_trait::async_trait;
use busrelay_core::{BusFrame, MacAddress, RelayRecord};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{BridgeHandle, GatewayBridge};
use crate::config::{BusConfig, GatewayConfig, GatewayConfigBuilder};
use crate::error::{GatewayError, Result};
use crate::interface::{
    BusAlerts, BusInterface, BusStatus, CredentialStore, RelayInterface, SendResultCallback,
    SendStatus, UpdateSubsystem,
};

/// Host name prefix used by the fixtures
pub const TEST_HOST_PREFIX: &str = "dev";

/// Host name used by the fixtures
pub const TEST_HOST_NAME: &str = "dev-A1B2C3";

/// Address bytes that select [`TEST_HOST_NAME`] in a trigger frame
pub const TEST_ADDRESS_FRAGMENT: [u8; 3] = [0xA1, 0xB2, 0xC3];

/// Driver start-up step a [`MockBus`] should fail at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailure {
    /// Driver installation
    Install,
    /// Driver start
    Start,
    /// Alert configuration
    Alerts,
}

#[derive(Debug, Default)]
struct BusState {
    frames: VecDeque<BusFrame>,
    alerts: VecDeque<BusAlerts>,
    start_failure: Option<StartFailure>,
    started_with: Option<BusConfig>,
    fail_receives: bool,
    closed: bool,
    status: BusStatus,
    waits: usize,
    receives: usize,
}

/// Mock bus driver fed from a frame queue
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// Create an empty mock bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a frame to the receive queue
    pub fn queue_frame(&self, frame: BusFrame) {
        self.state.lock().frames.push_back(frame);
    }

    /// Add several frames to the receive queue
    pub fn queue_frames(&self, frames: impl IntoIterator<Item = BusFrame>) {
        self.state.lock().frames.extend(frames);
    }

    /// Script the next alert mask returned by `wait_for_alerts`
    ///
    /// Without scripted alerts the mock reports `RX_DATA` whenever frames are
    /// queued and an empty mask otherwise.
    pub fn push_alerts(&self, alerts: BusAlerts) {
        self.state.lock().alerts.push_back(alerts);
    }

    /// Make `start` fail at the given step
    pub fn fail_start(&self, step: StartFailure) {
        self.state.lock().start_failure = Some(step);
    }

    /// Make every `receive_frame` call fail
    pub fn fail_receives(&self, enabled: bool) {
        self.state.lock().fail_receives = enabled;
    }

    /// Report exhaustion once the queues are empty
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Set the counters returned by `status`
    pub fn set_status(&self, status: BusStatus) {
        self.state.lock().status = status;
    }

    /// Frames still waiting in the receive queue
    pub fn pending(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Configuration passed to a successful `start`
    pub fn started_with(&self) -> Option<BusConfig> {
        self.state.lock().started_with.clone()
    }

    /// Number of `wait_for_alerts` calls
    pub fn wait_count(&self) -> usize {
        self.state.lock().waits
    }

    /// Number of `receive_frame` calls
    pub fn receive_count(&self) -> usize {
        self.state.lock().receives
    }
}

#[async_trait]
impl BusInterface for MockBus {
    async fn start(&mut self, config: &BusConfig) -> Result<()> {
        let mut state = self.state.lock();
        match state.start_failure {
            Some(StartFailure::Install) => Err(GatewayError::DriverInstallFailed(
                "simulated install failure".to_string(),
            )),
            Some(StartFailure::Start) => Err(GatewayError::DriverStartFailed(
                "simulated start failure".to_string(),
            )),
            Some(StartFailure::Alerts) => Err(GatewayError::AlertConfigFailed(
                "simulated alert failure".to_string(),
            )),
            None => {
                state.started_with = Some(config.clone());
                Ok(())
            }
        }
    }

    async fn wait_for_alerts(&mut self, timeout: Duration) -> Result<BusAlerts> {
        let alerts = {
            let mut state = self.state.lock();
            state.waits += 1;
            match state.alerts.pop_front() {
                Some(alerts) => alerts,
                None if state.frames.is_empty() => BusAlerts::NONE,
                None => BusAlerts::RX_DATA,
            }
        };

        // An idle bus waits out the full timeout, like the real driver
        if alerts.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(alerts)
    }

    async fn receive_frame(&mut self) -> Result<Option<BusFrame>> {
        let mut state = self.state.lock();
        state.receives += 1;
        if state.fail_receives {
            return Err(GatewayError::BusRead("simulated read failure".to_string()));
        }
        Ok(state.frames.pop_front())
    }

    fn status(&self) -> BusStatus {
        let state = self.state.lock();
        BusStatus {
            msgs_to_rx: state.frames.len() as u32,
            ..state.status
        }
    }

    fn is_exhausted(&self) -> bool {
        let state = self.state.lock();
        state.closed && state.frames.is_empty() && state.alerts.is_empty()
    }

    fn name(&self) -> &str {
        "MockBus"
    }
}

#[derive(Default)]
struct RelayState {
    sent: Vec<RelayRecord>,
    fail_sends: bool,
    attempts: usize,
}

/// Mock wireless relay recording every broadcast
#[derive(Clone)]
pub struct MockRelay {
    peer: MacAddress,
    state: Arc<Mutex<RelayState>>,
    callback: Option<SendResultCallback>,
}

impl MockRelay {
    /// Create a relay addressed to the broadcast peer
    pub fn new() -> Self {
        Self::with_peer(MacAddress::BROADCAST)
    }

    /// Create a relay addressed to a specific peer
    pub fn with_peer(peer: MacAddress) -> Self {
        Self {
            peer,
            state: Arc::new(Mutex::new(RelayState::default())),
            callback: None,
        }
    }

    /// Attach a send-result callback
    pub fn with_callback(mut self, callback: SendResultCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Make every broadcast fail
    pub fn fail_sends(&self, enabled: bool) {
        self.state.lock().fail_sends = enabled;
    }

    /// Records that were sent successfully
    pub fn sent(&self) -> Vec<RelayRecord> {
        self.state.lock().sent.clone()
    }

    /// Number of broadcast attempts, including failures
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    fn report(&self, status: SendStatus) {
        if let Some(callback) = &self.callback {
            callback(self.peer, status);
        }
    }
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayInterface for MockRelay {
    async fn broadcast(&mut self, record: &RelayRecord) -> Result<()> {
        let failed = {
            let mut state = self.state.lock();
            state.attempts += 1;
            if !state.fail_sends {
                state.sent.push(*record);
            }
            state.fail_sends
        };

        if failed {
            self.report(SendStatus::Failed);
            Err(GatewayError::SendFailed("simulated send failure".to_string()))
        } else {
            self.report(SendStatus::Delivered);
            Ok(())
        }
    }

    fn peer(&self) -> MacAddress {
        self.peer
    }

    fn name(&self) -> &str {
        "MockRelay"
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<(String, String), String>,
    reads: usize,
    writes: usize,
    fail_reads: bool,
    fail_writes: bool,
    failing_keys: HashSet<String>,
}

/// In-memory credential store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `(namespace, key, value)` entries
    pub fn with_entries(entries: &[(&str, &str, &str)]) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            for (namespace, key, value) in entries {
                state
                    .entries
                    .insert((namespace.to_string(), key.to_string()), value.to_string());
            }
        }
        store
    }

    /// Current value of a key, without counting as a read
    pub fn value(&self, namespace: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of `get` calls
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    /// Number of `put` and `remove` calls
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    /// Make every `get` fail
    pub fn fail_reads(&self, enabled: bool) {
        self.state.lock().fail_reads = enabled;
    }

    /// Make every `put` fail
    pub fn fail_writes(&self, enabled: bool) {
        self.state.lock().fail_writes = enabled;
    }

    /// Make writes to `key` fail, in any namespace
    pub fn fail_writes_to(&self, key: &str) {
        self.state.lock().failing_keys.insert(key.to_string());
    }
}

impl StoreState {
    fn check_write(&mut self, namespace: &str, key: &str) -> Result<()> {
        self.writes += 1;
        if self.fail_writes || self.failing_keys.contains(key) {
            return Err(GatewayError::StoreWrite {
                namespace: namespace.to_string(),
                key: key.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock();
        state.reads += 1;
        if state.fail_reads {
            return Err(GatewayError::StoreRead {
                namespace: namespace.to_string(),
                key: key.to_string(),
                reason: "simulated read failure".to_string(),
            });
        }
        Ok(state
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_write(namespace, key)?;
        state
            .entries
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn remove(&mut self, namespace: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_write(namespace, key)?;
        state.entries.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// Arguments of one `enter_update_mode` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCall {
    /// Timeout handed to the subsystem
    pub timeout: Duration,
    /// Network name
    pub name: String,
    /// Network secret
    pub secret: String,
}

#[derive(Debug, Default)]
struct UpdaterState {
    calls: Vec<UpdateCall>,
    fail: bool,
}

/// Mock update subsystem that returns immediately
#[derive(Debug, Clone)]
pub struct MockUpdater {
    host_name: String,
    state: Arc<Mutex<UpdaterState>>,
}

impl MockUpdater {
    /// Create an updater advertising `host_name`
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            state: Arc::new(Mutex::new(UpdaterState::default())),
        }
    }

    /// Make every update session fail
    pub fn fail_updates(&self, enabled: bool) {
        self.state.lock().fail = enabled;
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<UpdateCall> {
        self.state.lock().calls.clone()
    }
}

impl Default for MockUpdater {
    fn default() -> Self {
        Self::new(TEST_HOST_NAME)
    }
}

#[async_trait]
impl UpdateSubsystem for MockUpdater {
    fn host_name(&self) -> String {
        self.host_name.clone()
    }

    async fn enter_update_mode(&mut self, timeout: Duration, name: &str, secret: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(UpdateCall {
            timeout,
            name: name.to_string(),
            secret: secret.to_string(),
        });
        if state.fail {
            return Err(GatewayError::UpdateFailed(
                "simulated update failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Test fixture wiring all four mocks to a test configuration
#[derive(Clone)]
pub struct TestFixture {
    /// Mock bus driver
    pub bus: MockBus,
    /// Mock wireless relay
    pub relay: MockRelay,
    /// In-memory credential store
    pub store: MemoryStore,
    /// Mock update subsystem
    pub updater: MockUpdater,
    /// Test configuration
    pub config: GatewayConfig,
}

impl TestFixture {
    /// Create a fixture for a device named [`TEST_HOST_NAME`]
    pub fn new() -> Self {
        Self {
            bus: MockBus::new(),
            relay: MockRelay::new(),
            store: MemoryStore::new(),
            updater: MockUpdater::new(TEST_HOST_NAME),
            config: GatewayConfigBuilder::new()
                .host_prefix(TEST_HOST_PREFIX)
                .build(),
        }
    }

    /// Create a fixture with frames already queued on the bus
    pub fn with_frames(frames: impl IntoIterator<Item = BusFrame>) -> Self {
        let fixture = Self::new();
        fixture.bus.queue_frames(frames);
        fixture
    }

    /// Create a fixture whose store already holds a credential
    pub fn with_credential(name: &str, secret: &str) -> Self {
        let mut fixture = Self::new();
        fixture.store = MemoryStore::with_entries(&[
            ("wifi", "ssid", name),
            ("wifi", "password", secret),
        ]);
        fixture
    }

    /// Build a bridge over clones of the fixture's mocks
    pub fn bridge(&self) -> (GatewayBridge<MockBus, MockRelay, MemoryStore, MockUpdater>, BridgeHandle) {
        GatewayBridge::new(
            self.bus.clone(),
            self.relay.clone(),
            self.store.clone(),
            self.updater.clone(),
            self.config.clone(),
        )
    }

    /// Build a trigger frame addressed to this fixture's device
    pub fn trigger_frame() -> BusFrame {
        BusFrame::from_raw(
            crate::config::UPDATE_TRIGGER_ID,
            false,
            3,
            [
                TEST_ADDRESS_FRAGMENT[0],
                TEST_ADDRESS_FRAGMENT[1],
                TEST_ADDRESS_FRAGMENT[2],
                0,
                0,
                0,
                0,
                0,
            ],
        )
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
