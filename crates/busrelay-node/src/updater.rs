//! Update subsystem for hosts without an on-device firmware server
//!
//! Announces the update window and holds the gateway in update mode for it,
//! so an external flashing tool can reach the device by its host name.

use async_trait::async_trait;
use busrelay_bridge::{Result, UpdateSubsystem};
use busrelay_core::DeviceIdentity;
use std::time::Duration;
use tracing::info;

/// Update subsystem that waits out a fixed window
#[derive(Debug, Clone)]
pub struct HostUpdater {
    identity: DeviceIdentity,
    window: Option<Duration>,
}

impl HostUpdater {
    /// Create an updater for `identity`
    ///
    /// With no window the updater holds for the full timeout it is given.
    pub fn new(identity: DeviceIdentity, window: Option<Duration>) -> Self {
        Self { identity, window }
    }

    /// How long a session with `timeout` will last
    pub fn hold_for(&self, timeout: Duration) -> Duration {
        self.window.map_or(timeout, |window| window.min(timeout))
    }
}

#[async_trait]
impl UpdateSubsystem for HostUpdater {
    fn host_name(&self) -> String {
        self.identity.host_name().to_string()
    }

    async fn enter_update_mode(&mut self, timeout: Duration, name: &str, _secret: &str) -> Result<()> {
        let hold = self.hold_for(timeout);
        info!(
            host_name = %self.identity.host_name(),
            network = %name,
            window = %humantime::format_duration(hold),
            "Update window open"
        );

        tokio::time::sleep(hold).await;

        info!(host_name = %self.identity.host_name(), "Update window closed");
        Ok(())
    }
}
