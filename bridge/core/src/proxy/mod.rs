//! Foreground Proxy
//!
//! The application-facing half of the bridge. Every method call becomes one
//! tagged request on the channel; every tagged response coming back is
//! dispatched to the listeners registered for its kind.
//!
//! # Architecture
//!
//! ```text
//!   RelayProxy (any thread)          event loop task            relay context
//!   ───────────────────────          ───────────────            ─────────────
//!   connect/subscribe/...  ──────── requests ─────────────────▶ Relay::run
//!   on/off ─▶ Listeners ◀─ dispatch ◀── responses ◀──────────── Relay
//!                                     heartbeat timer ── ping ─▶
//! ```
//!
//! The event loop owns the response receiver, the heartbeat timer and the
//! [`RelayContext`]. It holds only a weak reference to the proxy, so dropping
//! the last [`RelayProxy`] clone stops the loop and discards the relay.
//!
//! When the heartbeat expires the loop terminates the relay context, forgets
//! the link, invokes the `disconnect` listeners once and exits. Requests made
//! afterwards fail with [`BridgeError::RelayUnavailable`] until `connect`
//! launches a new relay.

pub mod heartbeat;
pub mod listeners;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatTick, Liveness};
pub use listeners::{event, ControlListener, EventKind, Listeners, PayloadListener};

use crate::error::BridgeError;
use crate::protocol::{
    self, ChannelRequest, ConnectOptions, KeygenRequest, PresenceRequest, PublishRequest, Request,
    Response,
};
use crate::transport::{self, FrameReceiver, FrameSender, RelayContext, RelayLauncher};

/// Instructions from the proxy to its event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkSignal {
    /// Start the heartbeat timer if it is not running
    StartMonitoring,
    /// Drop the heartbeat timer
    StopMonitoring,
}

/// The proxy's side of one launched relay
#[derive(Debug)]
struct Link {
    requests: FrameSender,
    signals: mpsc::UnboundedSender<LinkSignal>,
}

struct ProxyShared {
    launcher: Box<dyn RelayLauncher>,
    runtime: tokio::runtime::Handle,
    heartbeat: Mutex<Heartbeat>,
    listeners: Listeners,
    /// Lock order: `link` before `heartbeat`
    link: Mutex<Option<Link>>,
}

/// Typed handle on a relay running in its own context
///
/// Cheap to clone; all clones share one relay, one heartbeat and one
/// listener registry. Listeners must not capture a clone of the proxy they
/// are registered on, or the proxy is never dropped.
#[derive(Clone)]
pub struct RelayProxy {
    shared: Arc<ProxyShared>,
}

impl RelayProxy {
    /// Launch a relay and start the proxy event loop
    ///
    /// Must be called from within a tokio runtime; the proxy keeps a handle
    /// on it, so its methods can be used from any thread afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoRuntime`] outside a runtime, or the
    /// launcher's error if the relay could not be started.
    pub fn new(
        launcher: impl RelayLauncher,
        config: HeartbeatConfig,
    ) -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;

        let shared = Arc::new(ProxyShared {
            launcher: Box::new(launcher),
            runtime,
            heartbeat: Mutex::new(Heartbeat::new(config)),
            listeners: Listeners::new(),
            link: Mutex::new(None),
        });

        let link = shared.launch_link()?;
        *shared.link.lock() = Some(link);

        Ok(Self { shared })
    }

    /// Ask the relay to open its network connection and start the heartbeat
    ///
    /// A relay that was declared dead, or whose context has gone away, is
    /// relaunched first. Calling `connect` while already monitoring re-sends
    /// `start` (which the relay ignores if connected) without starting a
    /// second timer.
    ///
    /// # Errors
    ///
    /// Returns an error if a relay had to be launched and could not be, or if
    /// the request could not be queued.
    pub fn connect(&self, options: ConnectOptions) -> Result<(), BridgeError> {
        let mut guard = self.shared.link.lock();

        let reusable = guard
            .as_ref()
            .is_some_and(|link| !link.requests.is_closed());
        if !reusable {
            tracing::info!("Launching a new relay context");
            *guard = Some(self.shared.launch_link()?);
        }
        let link = guard.as_ref().ok_or(BridgeError::RelayUnavailable)?;

        link.requests.send(&Request::Start(options))?;

        let mut heartbeat = self.shared.heartbeat.lock();
        if !reusable {
            heartbeat.stop();
        }
        if heartbeat.start() && link.signals.send(LinkSignal::StartMonitoring).is_err() {
            tracing::debug!("Event loop gone before monitoring started");
        }
        Ok(())
    }

    /// Ask the relay to close its network connection and stop the heartbeat
    ///
    /// No `disconnect` event is synthesized; listeners hear about it when the
    /// network client reports it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RelayUnavailable`] after the relay was declared
    /// dead, or an error if the request could not be queued.
    pub fn disconnect(&self) -> Result<(), BridgeError> {
        let guard = self.shared.link.lock();
        let link = guard.as_ref().ok_or(BridgeError::RelayUnavailable)?;

        link.requests.send(&Request::Disconnect)?;

        self.shared.heartbeat.lock().stop();
        if link.signals.send(LinkSignal::StopMonitoring).is_err() {
            tracing::debug!("Event loop gone before monitoring stopped");
        }
        Ok(())
    }

    /// Subscribe to a channel
    ///
    /// # Errors
    ///
    /// See [`RelayProxy::send`].
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<(), BridgeError> {
        self.send(&Request::Subscribe(ChannelRequest {
            key: key.into(),
            channel: channel.into(),
        }))
    }

    /// Unsubscribe from a channel
    ///
    /// # Errors
    ///
    /// See [`RelayProxy::send`].
    pub fn unsubscribe(
        &self,
        key: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<(), BridgeError> {
        self.send(&Request::Unsubscribe(ChannelRequest {
            key: key.into(),
            channel: channel.into(),
        }))
    }

    /// Request a key scoped to `channel` with the given permission letters
    ///
    /// # Errors
    ///
    /// See [`RelayProxy::send`].
    pub fn keygen(
        &self,
        key: impl Into<String>,
        channel: impl Into<String>,
        permissions: impl Into<String>,
        ttl: u64,
    ) -> Result<(), BridgeError> {
        self.send(&Request::Keygen(KeygenRequest {
            key: key.into(),
            channel: channel.into(),
            permissions: permissions.into(),
            ttl,
        }))
    }

    /// Publish a message
    ///
    /// # Errors
    ///
    /// See [`RelayProxy::send`].
    pub fn publish(
        &self,
        key: impl Into<String>,
        channel: impl Into<String>,
        message: impl Into<String>,
        me: Option<bool>,
        ttl: Option<u64>,
    ) -> Result<(), BridgeError> {
        self.send(&Request::Publish(PublishRequest {
            key: key.into(),
            channel: channel.into(),
            message: message.into(),
            me,
            ttl,
        }))
    }

    /// Request information about this connection
    ///
    /// # Errors
    ///
    /// See [`RelayProxy::send`].
    pub fn me(&self) -> Result<(), BridgeError> {
        self.send(&Request::Me)
    }

    /// Request a presence snapshot and/or change notifications
    ///
    /// # Errors
    ///
    /// See [`RelayProxy::send`].
    pub fn presence(
        &self,
        key: impl Into<String>,
        channel: impl Into<String>,
        status: Option<bool>,
        changes: Option<bool>,
    ) -> Result<(), BridgeError> {
        self.send(&Request::Presence(PresenceRequest {
            key: key.into(),
            channel: channel.into(),
            status,
            changes,
        }))
    }

    /// Queue one request for the relay
    ///
    /// Results arrive later through listeners. A request issued before a
    /// `connect` event is dropped by the relay without notice.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RelayUnavailable`] after the relay was declared
    /// dead, or [`BridgeError::ChannelClosed`] if the relay context is gone.
    pub fn send(&self, request: &Request) -> Result<(), BridgeError> {
        let guard = self.shared.link.lock();
        let link = guard.as_ref().ok_or(BridgeError::RelayUnavailable)?;
        link.requests.send(request)
    }

    /// Register a listener for one event kind
    ///
    /// Returns `false` if this exact listener was already registered.
    ///
    /// ```ignore
    /// proxy.on(event::Connect, Arc::new(|| println!("connected")));
    /// proxy.on(event::Message, Arc::new(|m: &MessagePayload| println!("{}", m.message)));
    /// ```
    pub fn on<K: EventKind>(&self, _kind: K, listener: Arc<K::Listener>) -> bool {
        let added = self.shared.listeners.on::<K>(listener);
        tracing::trace!(kind = K::NAME, added, "Listener registered");
        added
    }

    /// Unregister exactly this listener
    ///
    /// Returns `false` if it was not registered.
    pub fn off<K: EventKind>(&self, _kind: K, listener: &Arc<K::Listener>) -> bool {
        let removed = self.shared.listeners.off::<K>(listener);
        tracing::trace!(kind = K::NAME, removed, "Listener unregistered");
        removed
    }

    /// Number of listeners registered for a kind
    #[must_use]
    pub fn listener_count<K: EventKind>(&self, _kind: K) -> usize {
        self.shared.listeners.count::<K>()
    }

    /// Liveness of the relay
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.shared.heartbeat.lock().liveness()
    }

    /// Pings sent since the last pong
    #[must_use]
    pub fn unanswered_pings(&self) -> u32 {
        self.shared.heartbeat.lock().unanswered_pings()
    }

    /// Whether a relay context is currently linked
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.shared.link.lock().is_some()
    }
}

impl std::fmt::Debug for RelayProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayProxy")
            .field("liveness", &self.liveness())
            .field("unanswered_pings", &self.unanswered_pings())
            .field("linked", &self.is_linked())
            .finish_non_exhaustive()
    }
}

impl ProxyShared {
    /// Open a channel, launch a relay on it and spawn the event loop
    fn launch_link(self: &Arc<Self>) -> Result<Link, BridgeError> {
        let (proxy_end, relay_end) = transport::new_pair();
        let context = self.launcher.launch(relay_end)?;

        let (signals, signal_rx) = mpsc::unbounded_channel();
        let period = self.heartbeat.lock().config().interval;
        self.runtime.spawn(event_loop(
            Arc::downgrade(self),
            proxy_end.receiver,
            signal_rx,
            context,
            period,
        ));

        Ok(Link {
            requests: proxy_end.sender,
            signals,
        })
    }

    fn receive(&self, frame: Value) {
        let Some(response) = protocol::decode_response(frame) else {
            return;
        };

        if matches!(response, Response::Pong) {
            self.heartbeat.lock().record_pong();
            tracing::trace!("Pong received");
            return;
        }

        let notified = self.listeners.dispatch(&response);
        tracing::trace!(tag = response.tag(), listeners = notified, "Response dispatched");
    }

    /// Advance the heartbeat and send its ping
    ///
    /// On expiry the link is dropped in the same critical section, so a
    /// concurrent `connect` either sees the old link before the tick or
    /// launches a fresh relay after it.
    fn heartbeat_tick(&self) -> Option<HeartbeatTick> {
        let mut link = self.link.lock();
        let tick = self.heartbeat.lock().tick()?;

        if let Some(active) = link.as_ref() {
            if let Err(e) = active.requests.send(&Request::Ping) {
                tracing::debug!(error = %e, "Ping not delivered");
            }
        }

        if tick == HeartbeatTick::Expired {
            link.take();
        }
        Some(tick)
    }
}

enum LoopExit {
    Released,
    Expired(Arc<ProxyShared>),
}

async fn event_loop(
    shared: Weak<ProxyShared>,
    mut responses: FrameReceiver,
    mut signals: mpsc::UnboundedReceiver<LinkSignal>,
    context: RelayContext,
    period: Duration,
) {
    let mut timer: Option<Interval> = None;
    let mut responses_open = true;

    tracing::debug!("Proxy event loop started");

    let exit = loop {
        tokio::select! {
            frame = responses.recv(), if responses_open => {
                let Some(frame) = frame else {
                    tracing::debug!("Relay response channel closed");
                    responses_open = false;
                    continue;
                };
                let Some(shared) = shared.upgrade() else {
                    break LoopExit::Released;
                };
                shared.receive(frame);
            }
            signal = signals.recv() => match signal {
                Some(LinkSignal::StartMonitoring) => {
                    if timer.is_none() {
                        timer = Some(heartbeat_timer(period));
                    }
                }
                Some(LinkSignal::StopMonitoring) => timer = None,
                None => break LoopExit::Released,
            },
            () = next_tick(&mut timer) => {
                let Some(shared) = shared.upgrade() else {
                    break LoopExit::Released;
                };
                match shared.heartbeat_tick() {
                    Some(HeartbeatTick::Ping) => {}
                    Some(HeartbeatTick::Expired) => break LoopExit::Expired(shared),
                    None => timer = None,
                }
            }
        }
    };

    context.terminate();

    match exit {
        LoopExit::Released => tracing::debug!("Proxy event loop stopped"),
        LoopExit::Expired(shared) => {
            tracing::warn!(
                unanswered = shared.heartbeat.lock().unanswered_pings(),
                "Relay stopped answering pings, relay context discarded"
            );
            shared.listeners.dispatch(&Response::Disconnect);
        }
    }
}

fn heartbeat_timer(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
