//! GatewayBridge - the poll-driven gateway service
//!
//! The bridge owns the four collaborators, the provisioning session and the
//! mode machine. Each poll waits for bus alerts, drains every pending frame
//! on `RX_DATA`, and hands each frame to the dispatcher.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        GatewayBridge                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────┐    ┌───────────────────┐    ┌────────────┐   │
//! │  │ Bus driver │───►│ MessageDispatcher │───►│ Relay      │   │
//! │  │ (alerts,   │    │                   │    │ (wireless) │   │
//! │  │  frames)   │    │ FrameTranslator   │    └────────────┘   │
//! │  └────────────┘    │ Provisioning      │    ┌────────────┐   │
//! │                    │ UpdateTrigger     │───►│ Store      │   │
//! │  ┌────────────┐    └─────────┬─────────┘    └────────────┘   │
//! │  │ BridgeHandle│             │              ┌────────────┐   │
//! │  │ (stats,    │              └─────────────►│ Updater    │   │
//! │  │  shutdown) │                             └────────────┘   │
//! │  └────────────┘                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use busrelay_bridge::{GatewayBridge, GatewayConfig};
//!
//! let (bridge, handle) = GatewayBridge::new(bus, relay, store, updater, GatewayConfig::default());
//! tokio::spawn(bridge.run());
//!
//! let stats = handle.stats().await?;
//! handle.shutdown().await?;
//! ```

use busrelay_core::BusFrame;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::config::GatewayConfig;
use crate::credential::Credential;
use crate::dispatcher::{CommitResult, Dispatched, MessageDispatcher};
use crate::error::{GatewayError, Result};
use crate::interface::{
    BusAlerts, BusInterface, CredentialStore, RelayInterface, SendStatus, UpdateSubsystem,
};
use crate::provisioning::{ProvisioningEvent, ProvisioningSession};
use crate::trigger::{TriggerAction, TriggerOutcome, UpdateTrigger};

/// Commands that can be sent to the bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// Get bridge statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shutdown the bridge
    Shutdown,
}

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Poll iterations run
    pub polls: u64,
    /// Frames taken from the bus
    pub frames_received: u64,
    /// Frames handed to the relay successfully
    pub frames_forwarded: u64,
    /// Relay sends that failed
    pub send_failures: u64,
    /// Frames routed to the provisioning session
    pub provisioning_frames: u64,
    /// Credentials written to the store
    pub credentials_committed: u64,
    /// Completed sessions whose store write failed
    pub commit_failures: u64,
    /// Sessions rejected at validation
    pub provisioning_rejections: u64,
    /// Trigger frames that did not lead to an update session
    pub triggers_ignored: u64,
    /// Update sessions entered
    pub update_sessions: u64,
    /// Update sessions that returned an error
    pub update_failures: u64,
    /// Failed bus reads
    pub bus_read_errors: u64,
    /// Error-passive alerts seen
    pub error_passive_alerts: u64,
    /// Bus error alerts seen
    pub bus_error_alerts: u64,
    /// Receive queue overflow alerts seen
    pub queue_full_alerts: u64,
}

/// Operating mode of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayMode {
    /// Draining the bus and dispatching frames
    #[default]
    Bridging,
    /// Held by the update subsystem; nothing is drained
    Updating,
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayMode::Bridging => write!(f, "bridging"),
            GatewayMode::Updating => write!(f, "updating"),
        }
    }
}

/// Bus driver state after initialisation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DriverState {
    /// `start` has not run yet
    #[default]
    NotStarted,
    /// Driver installed, started and configured
    Ready,
    /// Initialisation failed; no frames are read until restart
    Disabled {
        /// Why the driver is unavailable
        reason: String,
    },
}

impl DriverState {
    /// Check if frames can be read
    pub fn is_ready(&self) -> bool {
        matches!(self, DriverState::Ready)
    }
}

/// Handle for controlling the GatewayBridge
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Get bridge statistics
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| GatewayError::ChannelClosed)?;
        rx.await.map_err(|_| GatewayError::ChannelClosed)
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

/// Gateway service relaying bus frames and serving the control protocols
pub struct GatewayBridge<B, R, S, U> {
    /// Bus driver
    bus: B,
    /// Wireless relay
    relay: R,
    /// Persistent credential store
    store: S,
    /// Firmware-update subsystem
    updater: U,
    /// Gateway configuration
    config: GatewayConfig,
    /// Frame router
    dispatcher: MessageDispatcher,
    /// The single provisioning session
    session: ProvisioningSession,
    /// Current operating mode
    mode: GatewayMode,
    /// Driver state after `start`
    driver: DriverState,
    /// Bridge statistics
    stats: BridgeStats,
    /// Command receiver
    command_rx: mpsc::Receiver<BridgeCommand>,
}

impl<B, R, S, U> GatewayBridge<B, R, S, U>
where
    B: BusInterface,
    R: RelayInterface,
    S: CredentialStore,
    U: UpdateSubsystem,
{
    /// Create a new bridge over the given collaborators
    ///
    /// The update subsystem is asked for the host name once, here.
    pub fn new(bus: B, relay: R, store: S, updater: U, config: GatewayConfig) -> (Self, BridgeHandle) {
        let host_name = updater.host_name();
        let trigger = UpdateTrigger::new(config.update.host_prefix.clone(), host_name);
        let dispatcher = MessageDispatcher::new(trigger, config.store.clone());

        let (command_tx, command_rx) = mpsc::channel(256);
        let handle = BridgeHandle { command_tx };

        info!(
            host_name = %dispatcher.trigger().host_name(),
            bus = bus.name(),
            relay = relay.name(),
            peer = %relay.peer(),
            "Gateway bridge created"
        );

        let bridge = Self {
            bus,
            relay,
            store,
            updater,
            config,
            dispatcher,
            session: ProvisioningSession::new(),
            mode: GatewayMode::Bridging,
            driver: DriverState::NotStarted,
            stats: BridgeStats::default(),
            command_rx,
        };

        (bridge, handle)
    }

    /// Current operating mode
    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    /// Current driver state
    pub fn driver_state(&self) -> &DriverState {
        &self.driver
    }

    /// Statistics so far
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// The provisioning session
    pub fn session(&self) -> &ProvisioningSession {
        &self.session
    }

    /// This device's host name
    pub fn host_name(&self) -> &str {
        self.dispatcher.trigger().host_name()
    }

    /// Install, start and configure the bus driver
    ///
    /// A failure is logged and leaves the driver disabled; the gateway keeps
    /// running without reading frames.
    pub async fn start(&mut self) -> DriverState {
        let bus = &self.config.bus;
        debug!(
            tx_pin = bus.tx_pin,
            rx_pin = bus.rx_pin,
            bitrate = bus.bitrate,
            mode = ?bus.mode,
            alerts = %bus.alerts,
            "Starting bus driver"
        );

        self.driver = match self.bus.start(bus).await {
            Ok(()) => {
                info!(bus = self.bus.name(), "Bus driver ready");
                DriverState::Ready
            }
            Err(e) => {
                error!(
                    error = %e,
                    code = e.error_code(),
                    bus = self.bus.name(),
                    "Bus driver unavailable, frames will not be read"
                );
                DriverState::Disabled {
                    reason: e.to_string(),
                }
            }
        };
        self.driver.clone()
    }

    /// Run one poll iteration and return the number of frames handled
    ///
    /// Waits up to the poll interval for alerts. On `RX_DATA` every pending
    /// frame is drained before returning.
    pub async fn poll_once(&mut self) -> usize {
        self.stats.polls += 1;
        let poll_interval = self.config.bus.poll_interval;

        if !self.driver.is_ready() {
            tokio::time::sleep(poll_interval).await;
            return 0;
        }

        let alerts = match self.bus.wait_for_alerts(poll_interval).await {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Waiting for bus alerts failed");
                self.stats.bus_read_errors += 1;
                return 0;
            }
        };

        self.record_alerts(alerts);

        let handled = if alerts.contains(BusAlerts::RX_DATA) {
            self.drain().await
        } else {
            0
        };

        self.maybe_log_status();
        handled
    }

    /// Route one frame and carry out its action
    ///
    /// A matched update trigger is resolved here: the returned value carries
    /// the final trigger outcome rather than the hand-off request.
    pub async fn handle_frame(&mut self, frame: &BusFrame) -> Dispatched {
        self.stats.frames_received += 1;

        let dispatched = self
            .dispatcher
            .dispatch(frame, &mut self.session, &mut self.relay, &mut self.store)
            .await;

        if let Dispatched::Trigger(TriggerAction::EnterUpdate(credential)) = dispatched {
            let outcome = self.enter_update(credential).await;
            return Dispatched::Trigger(TriggerAction::Done(outcome));
        }

        match &dispatched {
            Dispatched::Forwarded { status, .. } => match status {
                SendStatus::Delivered => self.stats.frames_forwarded += 1,
                SendStatus::Failed => self.stats.send_failures += 1,
            },
            Dispatched::Provisioning { event, commit } => {
                self.stats.provisioning_frames += 1;
                match (event, commit) {
                    (_, Some(CommitResult::Stored)) => self.stats.credentials_committed += 1,
                    (_, Some(CommitResult::StoreFailed(_))) => self.stats.commit_failures += 1,
                    (ProvisioningEvent::Rejected(_), _) => self.stats.provisioning_rejections += 1,
                    _ => {}
                }
            }
            Dispatched::Trigger(_) => self.stats.triggers_ignored += 1,
        }
        dispatched
    }

    /// Run the bridge until shutdown or until a finite bus source runs dry
    ///
    /// Starts the driver first if `start` has not been called. Commands from
    /// the [`BridgeHandle`] are served between polls.
    pub async fn run(mut self) -> Result<()> {
        info!(host_name = %self.host_name(), "Starting gateway bridge");

        if self.driver == DriverState::NotStarted {
            self.start().await;
        }

        loop {
            if self.serve_commands() {
                info!("Bridge shutdown requested");
                break;
            }

            if self.bus.is_exhausted() {
                info!(bus = self.bus.name(), "Bus source exhausted");
                break;
            }

            let handled = self.poll_once().await;
            trace!(handled, "Poll complete");
        }

        info!(
            frames_received = self.stats.frames_received,
            frames_forwarded = self.stats.frames_forwarded,
            credentials_committed = self.stats.credentials_committed,
            update_sessions = self.stats.update_sessions,
            "Gateway bridge stopped"
        );
        Ok(())
    }

    /// Serve queued commands; returns true on shutdown
    fn serve_commands(&mut self) -> bool {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                BridgeCommand::GetStats(tx) => {
                    let _ = tx.send(self.stats.clone());
                }
                BridgeCommand::Shutdown => return true,
            }
        }
        false
    }

    async fn drain(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.bus.receive_frame().await {
                Ok(Some(frame)) => {
                    self.handle_frame(&frame).await;
                    handled += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, code = e.error_code(), "Bus read failed, ending drain");
                    self.stats.bus_read_errors += 1;
                    break;
                }
            }
        }
        trace!(handled, "Receive queue drained");
        handled
    }

    async fn enter_update(&mut self, credential: Credential) -> TriggerOutcome {
        let timeout = self.config.update.timeout;

        self.mode = GatewayMode::Updating;
        self.stats.update_sessions += 1;
        info!(
            host_name = %self.host_name(),
            network = %credential.name,
            timeout = %humantime::format_duration(timeout),
            "Entering update mode"
        );

        let result = self
            .updater
            .enter_update_mode(timeout, &credential.name, &credential.secret)
            .await;

        self.mode = GatewayMode::Bridging;

        match result {
            Ok(()) => {
                info!("Update session ended, resuming bridging");
                TriggerOutcome::UpdateCompleted
            }
            Err(e) => {
                error!(error = %e, code = e.error_code(), "Update session failed, resuming bridging");
                self.stats.update_failures += 1;
                TriggerOutcome::UpdateFailed(e.to_string())
            }
        }
    }

    fn record_alerts(&mut self, alerts: BusAlerts) {
        if alerts.is_empty() {
            return;
        }
        trace!(%alerts, "Bus alerts raised");

        if alerts.contains(BusAlerts::ERR_PASS) {
            self.stats.error_passive_alerts += 1;
            warn!("Bus controller is error passive");
        }
        if alerts.contains(BusAlerts::BUS_ERROR) {
            self.stats.bus_error_alerts += 1;
            let status = self.bus.status();
            warn!(
                rx_errors = status.rx_error_counter,
                tx_errors = status.tx_error_counter,
                "Bus error detected"
            );
        }
        if alerts.contains(BusAlerts::RX_QUEUE_FULL) {
            self.stats.queue_full_alerts += 1;
            let status = self.bus.status();
            warn!(
                queued = status.msgs_to_rx,
                "Bus receive queue full, frames lost"
            );
        }
    }

    fn maybe_log_status(&self) {
        let every = u64::from(self.config.bus.status_log_every);
        if every == 0 || self.stats.polls % every != 0 {
            return;
        }
        let status = self.bus.status();
        info!(
            rx_errors = status.rx_error_counter,
            tx_errors = status.tx_error_counter,
            queued = status.msgs_to_rx,
            mode = %self.mode,
            "Bus driver status"
        );
    }
}
