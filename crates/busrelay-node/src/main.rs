//! Busrelay Node - host-side relay gateway
//!
//! This binary runs the gateway engine against host stand-ins for the
//! device collaborators:
//! - frames are read from a candump log (a file, or stdin for live capture)
//! - relay records are broadcast as UDP datagrams
//! - credentials are kept in a JSON file
//! - update mode holds the gateway for a configurable window

mod bus;
mod relay;
mod store;
mod updater;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use busrelay_bridge::{logging_send_callback, GatewayBridge, GatewayConfig};
use busrelay_core::{DeviceIdentity, MacAddress};

use bus::{CandumpBus, CandumpSource};
use relay::UdpRelay;
use store::JsonFileStore;
use updater::HostUpdater;

#[derive(Parser)]
#[command(name = "busrelay-node")]
#[command(about = "Relay bus frames from a candump log over UDP, with provisioning and update triggers")]
struct Args {
    /// Gateway configuration file (JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Candump log to replay, or `-` for stdin
    #[arg(long, short, default_value = "-")]
    input: String,

    /// UDP target for relay records
    #[arg(long, default_value = "255.255.255.255:52000")]
    relay_addr: SocketAddr,

    /// Credential store file (JSON); kept in memory when omitted
    #[arg(long)]
    store: Option<PathBuf>,

    /// Explicit host name, overriding the one derived from --mac
    #[arg(long)]
    host_name: Option<String>,

    /// Station address the host name is derived from
    #[arg(long, default_value = "02:00:00:00:00:01")]
    mac: MacAddress,

    /// How long to hold update mode (capped by the configured timeout)
    #[arg(long, value_parser = humantime::parse_duration)]
    update_window: Option<Duration>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(args.config.as_deref())?;
    config.validate()?;

    let prefix = config.update.host_prefix.clone();
    let identity = match &args.host_name {
        Some(host_name) => DeviceIdentity::with_host_name(prefix, host_name.clone()),
        None => DeviceIdentity::from_mac(prefix, &args.mac),
    };

    info!("Starting Busrelay Node: {}", identity.host_name());

    let bus = CandumpBus::new(CandumpSource::from_arg(&args.input));
    let relay = UdpRelay::bind(args.relay_addr, &config.relay, logging_send_callback())
        .await
        .with_context(|| format!("failed to set up relay to {}", args.relay_addr))?;
    let store = match &args.store {
        Some(path) => JsonFileStore::open(path)
            .await
            .with_context(|| format!("failed to open credential store {}", path.display()))?,
        None => {
            warn!("No --store given, credentials will not survive a restart");
            JsonFileStore::in_memory()
        }
    };
    let updater = HostUpdater::new(identity, args.update_window);

    let (bridge, handle) = GatewayBridge::new(bus, relay, store, updater, config);
    let mut task = tokio::spawn(bridge.run());

    tokio::select! {
        result = &mut task => {
            result.context("gateway task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            if let Ok(stats) = handle.stats().await {
                info!(
                    received = stats.frames_received,
                    forwarded = stats.frames_forwarded,
                    send_failures = stats.send_failures,
                    committed = stats.credentials_committed,
                    "Final statistics"
                );
            }
            handle.shutdown().await?;
            task.await.context("gateway task panicked")??;
        }
    }

    Ok(())
}

/// Read the gateway configuration, or fall back to defaults
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<GatewayConfig> {
    let Some(path) = path else {
        return Ok(GatewayConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: GatewayConfig = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config {}", path.display()))?;

    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}
