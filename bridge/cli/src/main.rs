//! Emitter Bridge - Scripted Loopback Session
//!
//! Runs one foreground proxy and its background relay against an in-memory
//! broker: connect, request a channel key, subscribe, ask for presence,
//! publish a few messages, ask who we are, then disconnect. Every event the
//! proxy's listeners receive is printed as one JSON line.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from ~/.config/emitter-bridge/bridge.toml
//! emitter-bridge
//!
//! # Publish ten messages on a custom channel
//! emitter-bridge --channel news/ --count 10
//!
//! # Kill the relay and watch the heartbeat declare it dead
//! emitter-bridge --kill-relay
//!
//! # Verbose logging
//! RUST_LOG=debug emitter-bridge
//! ```

mod session;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use bridge_core::client::loopback::LoopbackBroker;
use bridge_core::{load_config, load_config_from_path, ConfigOverrides, RelayProxy};

use session::{EventStream, LoopbackLauncher, Script};

/// Emitter Bridge - drive a relay proxy through a loopback session
#[derive(Parser, Debug)]
#[command(name = "emitter-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "EMITTER_BRIDGE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker host name
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Use a TLS connection
    #[arg(long)]
    secure: bool,

    /// Name shown to other clients in presence events
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Channel to publish on
    #[arg(long, default_value = "lobby/")]
    channel: String,

    /// Number of messages to publish
    #[arg(short = 'n', long, default_value_t = 3)]
    count: usize,

    /// Master key of the loopback broker
    #[arg(long, env = "EMITTER_BRIDGE_MASTER_KEY", default_value = "loopback-master")]
    master_key: String,

    /// Disable the relay heartbeat
    #[arg(long)]
    no_heartbeat: bool,

    /// Kill the relay context at the end instead of disconnecting
    #[arg(long, conflicts_with = "no_heartbeat")]
    kill_relay: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "EMITTER_BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref host) = self.host {
            overrides = overrides.with_host(host);
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        if self.secure {
            overrides = overrides.with_secure(true);
        }
        if let Some(ref username) = self.username {
            overrides = overrides.with_username(username);
        }
        if self.no_heartbeat {
            overrides = overrides.with_heartbeat_enabled(false);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("emitter_bridge={level},bridge_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Emitter bridge starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match args.config.clone() {
        Some(path) => load_config_from_path(Some(path)),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(source = %config.source(), "Configuration loaded");
    if let Some(ref path) = config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    let kill_relay = if args.kill_relay {
        if !config.heartbeat.enabled {
            bail!("--kill-relay needs the heartbeat; it is disabled in the configuration");
        }
        // One interval per tolerated ping, one for the expiring tick, one spare
        let intervals = config.heartbeat.max_unanswered_pings.saturating_add(2);
        Some(config.heartbeat.interval.saturating_mul(intervals))
    } else {
        None
    };

    let broker = LoopbackBroker::new(args.master_key.clone());
    let launcher = LoopbackLauncher::new(broker.clone());
    let relays = launcher.handles();

    let proxy =
        RelayProxy::new(launcher, config.heartbeat.clone()).context("Failed to start relay")?;
    let mut events = EventStream::attach(&proxy);

    let script = Script {
        options: config.client.clone(),
        master_key: args.master_key,
        channel: args.channel,
        count: args.count,
        kill_relay,
    };

    session::run(&proxy, &mut events, &relays, &script).await?;

    info!(open_sessions = broker.session_count(), "Session finished");
    Ok(())
}
