//! Scripted Loopback Session
//!
//! Drives one proxy through the whole request vocabulary against an
//! in-memory broker and prints every event its listeners receive.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use bridge_core::client::loopback::{LoopbackBroker, LoopbackClient};
use bridge_core::transport::RelayEndpoint;
use bridge_core::{
    event, BridgeError, ConnectOptions, ControlListener, KeygenPayload, PayloadListener, Relay,
    RelayContext, RelayLauncher, RelayProxy, Response,
};

/// How long to wait for an ordinary event
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifetime of the key requested for the session channel
const KEY_TTL_SECS: u64 = 300;

/// Every permission the broker knows
const ALL_PERMISSIONS: &str = "rwslpe";

// ============================================================================
// Relay Launcher
// ============================================================================

/// Launches loopback relays as tasks and remembers them so they can be killed
pub struct LoopbackLauncher {
    broker: LoopbackBroker,
    relays: RelayHandles,
}

impl LoopbackLauncher {
    pub fn new(broker: LoopbackBroker) -> Self {
        Self {
            broker,
            relays: RelayHandles::default(),
        }
    }

    /// Handles to every relay this launcher starts
    pub fn handles(&self) -> RelayHandles {
        self.relays.clone()
    }
}

impl RelayLauncher for LoopbackLauncher {
    fn launch(&self, endpoint: RelayEndpoint) -> Result<RelayContext, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;

        let RelayEndpoint { sender, receiver } = endpoint;
        let relay = Relay::new(LoopbackClient::new(self.broker.clone()), sender);
        let task = runtime.spawn(relay.run(receiver));

        self.relays.0.lock().push(task.abort_handle());
        Ok(RelayContext::new(task.abort_handle()))
    }
}

/// Shared list of launched relay tasks
#[derive(Clone, Default)]
pub struct RelayHandles(Arc<Mutex<Vec<AbortHandle>>>);

impl RelayHandles {
    /// Abort every relay without telling the proxy
    pub fn kill_all(&self) -> usize {
        let handles = std::mem::take(&mut *self.0.lock());
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

/// Funnels every listener kind into one ordered stream
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Response>,
}

impl EventStream {
    /// Register a listener for every event kind on `proxy`
    pub fn attach(proxy: &RelayProxy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        proxy.on(event::Connect, control(&tx, Response::Connect));
        proxy.on(event::Disconnect, control(&tx, Response::Disconnect));
        proxy.on(event::Offline, control(&tx, Response::Offline));
        proxy.on(event::Message, payload(&tx, Response::Message));
        proxy.on(event::Error, payload(&tx, Response::Error));
        proxy.on(event::Keygen, payload(&tx, Response::Keygen));
        proxy.on(event::Presence, payload(&tx, Response::Presence));
        proxy.on(event::Me, payload(&tx, Response::Me));

        Self { rx }
    }

    /// Print events until one tagged `tag` arrives, and return it
    pub async fn wait_for(&mut self, tag: &str, within: Duration) -> Result<Response> {
        let wait = async {
            while let Some(response) = self.rx.recv().await {
                print_event(&response);
                if response.tag() == tag {
                    return Some(response);
                }
            }
            None
        };

        tokio::time::timeout(within, wait)
            .await
            .with_context(|| format!("Timed out waiting for `{tag}`"))?
            .with_context(|| format!("Event stream ended before `{tag}`"))
    }
}

fn control(tx: &mpsc::UnboundedSender<Response>, response: Response) -> Arc<ControlListener> {
    let tx = tx.clone();
    Arc::new(move || forward(&tx, response.clone()))
}

fn payload<T: Clone + 'static>(
    tx: &mpsc::UnboundedSender<Response>,
    wrap: fn(T) -> Response,
) -> Arc<PayloadListener<T>> {
    let tx = tx.clone();
    Arc::new(move |value: &T| forward(&tx, wrap(value.clone())))
}

fn forward(tx: &mpsc::UnboundedSender<Response>, response: Response) {
    if let Err(e) = tx.send(response) {
        debug!(tag = e.0.tag(), "Event stream closed, dropping event");
    }
}

fn print_event(response: &Response) {
    match serde_json::to_string(response) {
        Ok(json) => println!("{:<10} {json}", response.tag()),
        Err(e) => warn!(error = %e, tag = response.tag(), "Event not printable"),
    }
}

// ============================================================================
// Script
// ============================================================================

/// What the scripted session does
#[derive(Debug, Clone)]
pub struct Script {
    pub options: ConnectOptions,
    pub master_key: String,
    pub channel: String,
    pub count: usize,
    /// Kill the relay at the end instead of disconnecting, and wait this long
    /// for the heartbeat to notice
    pub kill_relay: Option<Duration>,
}

/// Run the script to completion
pub async fn run(
    proxy: &RelayProxy,
    events: &mut EventStream,
    relays: &RelayHandles,
    script: &Script,
) -> Result<()> {
    info!(host = %script.options.host, port = script.options.port, "Connecting");
    proxy.connect(script.options.clone())?;
    events.wait_for("connect", EVENT_TIMEOUT).await?;

    proxy.keygen(
        &script.master_key,
        &script.channel,
        ALL_PERMISSIONS,
        KEY_TTL_SECS,
    )?;
    let key = match events.wait_for("keygen", EVENT_TIMEOUT).await? {
        Response::Keygen(KeygenPayload::Granted { key, .. }) => key,
        Response::Keygen(KeygenPayload::Denied { status, message }) => {
            bail!("Key generation refused ({status}): {message}")
        }
        other => bail!("Unexpected event: {}", other.tag()),
    };
    info!(channel = %script.channel, "Channel key granted");

    proxy.subscribe(&key, &script.channel)?;
    proxy.presence(&key, &script.channel, Some(true), Some(false))?;
    events.wait_for("presence", EVENT_TIMEOUT).await?;

    for index in 1..=script.count {
        let message = format!("message {index}");
        proxy.publish(&key, &script.channel, message, None, None)?;
    }
    for _ in 0..script.count {
        events.wait_for("message", EVENT_TIMEOUT).await?;
    }

    proxy.me()?;
    events.wait_for("me", EVENT_TIMEOUT).await?;

    match script.kill_relay {
        Some(grace) => {
            let killed = relays.kill_all();
            info!(killed, "Relay context killed, waiting for the heartbeat");
            events.wait_for("disconnect", grace).await?;
            info!(liveness = %proxy.liveness(), "Relay declared dead");
        }
        None => {
            proxy.unsubscribe(&key, &script.channel)?;
            proxy.disconnect()?;
            events.wait_for("disconnect", EVENT_TIMEOUT).await?;
        }
    }

    Ok(())
}
