//! Loopback Network Client
//!
//! An in-memory publish/subscribe broker that implements the network client
//! capability without touching the network. Every connection opened through a
//! [`LoopbackClient`] lands in the same shared [`LoopbackBroker`], so several
//! relays can talk to each other inside one process.
//!
//! Semantics modelled:
//! - keys: the master key may do anything; generated keys are scoped to one
//!   channel and carry permission letters (`r` read, `w` write, `s` store,
//!   `l` load, `p` presence, `e` extend) and an optional expiry
//! - `publish` delivers to every online subscriber, skipping the publisher
//!   when `me` is `false`
//! - `presence` answers with a status snapshot and/or registers for
//!   subscribe/unsubscribe notifications
//! - broker-wide failure injection: refusing connections, going offline,
//!   broadcasting errors, dropping a session
//!
//! Connections are established synchronously. A `connect` callback registered
//! on an online connection therefore fires immediately, and an `error`
//! callback registered on a refused connection receives the refusal.
//!
//! Callbacks are never invoked while the broker lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::{
    ChannelArgs, ClientCallback, ClientEvent, ClientEventKind, ClientMessage, ConnectOptions,
    Connection, KeygenArgs, NetworkClient, PresenceArgs, PublishArgs,
};
use crate::protocol::{KeygenPayload, MePayload, PresenceMember, PresencePayload};

/// Letters accepted in a key's permission string
pub const PERMISSION_LETTERS: &str = "rwslpe";

type SharedCallback = Arc<dyn Fn(ClientEvent) + Send + Sync>;
type Deliveries = Vec<(SharedCallback, ClientEvent)>;

/// Shared in-memory broker
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

struct BrokerState {
    master_key: String,
    sessions: HashMap<String, Session>,
    grants: HashMap<String, Grant>,
    refusal: Option<Value>,
}

struct Session {
    username: Option<String>,
    refused: Option<Value>,
    online: bool,
    callbacks: HashMap<ClientEventKind, Vec<SharedCallback>>,
    subscriptions: HashSet<String>,
    watching: HashSet<String>,
}

impl Session {
    fn member(&self, id: &str) -> PresenceMember {
        PresenceMember {
            id: id.to_string(),
            username: self.username.clone(),
        }
    }

    fn notify(&self, event: &ClientEvent, out: &mut Deliveries) {
        if let Some(callbacks) = self.callbacks.get(&event.kind()) {
            for callback in callbacks {
                out.push((Arc::clone(callback), event.clone()));
            }
        }
    }
}

struct Grant {
    channel: String,
    permissions: String,
    expires_at: Option<Instant>,
}

impl Grant {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }

    fn allows(&self, channel: &str, letter: char) -> bool {
        self.is_live(Instant::now()) && self.channel == channel && self.permissions.contains(letter)
    }
}

fn deliver(deliveries: Deliveries) {
    for (callback, event) in deliveries {
        callback(event);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn unauthorized() -> ClientEvent {
    ClientEvent::Error(json!({"status": 401, "message": "unauthorized"}))
}

impl BrokerState {
    fn authorize(&self, key: &str, channel: &str, letter: char) -> bool {
        key == self.master_key
            || self
                .grants
                .get(key)
                .is_some_and(|grant| grant.allows(channel, letter))
    }

    fn prune_expired_grants(&mut self) {
        let now = Instant::now();
        self.grants.retain(|_, grant| grant.is_live(now));
    }

    /// The session if it exists and is online
    fn online(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id).filter(|s| s.online)
    }

    /// Tell every presence watcher of `channel` that `who` came or went
    fn notify_watchers(&self, channel: &str, event: &ClientEvent, out: &mut Deliveries) {
        for session in self.sessions.values() {
            if session.online && session.watching.contains(channel) {
                session.notify(event, out);
            }
        }
    }

    /// Drop a session and tell watchers of every channel it was subscribed to
    fn remove_session(&mut self, id: &str, out: &mut Deliveries) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        let time = unix_now();
        for channel in &session.subscriptions {
            let event = ClientEvent::Presence(PresencePayload::Unsubscribe {
                channel: channel.clone(),
                time,
                who: session.member(id),
            });
            self.notify_watchers(channel, &event, out);
        }
        Some(session)
    }
}

impl LoopbackBroker {
    /// Create a broker whose master key authorises everything
    #[must_use]
    pub fn new(master_key: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                master_key: master_key.into(),
                sessions: HashMap::new(),
                grants: HashMap::new(),
                refusal: None,
            })),
        }
    }

    /// Refuse every connection opened from now on with the given error
    pub fn refuse_connections(&self, error: Value) {
        self.state.lock().refusal = Some(error);
    }

    /// Accept connections again
    pub fn accept_connections(&self) {
        self.state.lock().refusal = None;
    }

    /// Take every session offline and fire their `offline` callbacks
    pub fn go_offline(&self) {
        let mut out = Deliveries::new();
        {
            let mut state = self.state.lock();
            for session in state.sessions.values_mut() {
                if session.online {
                    session.online = false;
                    session.notify(&ClientEvent::Offline, &mut out);
                }
            }
        }
        deliver(out);
    }

    /// Bring offline (but not refused) sessions back and fire `connect`
    pub fn come_online(&self) {
        let mut out = Deliveries::new();
        {
            let mut state = self.state.lock();
            for session in state.sessions.values_mut() {
                if !session.online && session.refused.is_none() {
                    session.online = true;
                    session.notify(&ClientEvent::Connect, &mut out);
                }
            }
        }
        deliver(out);
    }

    /// Fire an `error` callback on every session
    pub fn broadcast_error(&self, error: Value) {
        let mut out = Deliveries::new();
        {
            let state = self.state.lock();
            let event = ClientEvent::Error(error);
            for session in state.sessions.values() {
                session.notify(&event, &mut out);
            }
        }
        deliver(out);
    }

    /// Close one session from the broker side and fire its `disconnect`
    ///
    /// Returns `false` if no such session exists.
    pub fn drop_session(&self, id: &str) -> bool {
        let mut out = Deliveries::new();
        let found = {
            let mut state = self.state.lock();
            match state.remove_session(id, &mut out) {
                Some(session) => {
                    session.notify(&ClientEvent::Disconnect, &mut out);
                    true
                }
                None => false,
            }
        };
        deliver(out);
        found
    }

    /// Ids of every open session
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.state.lock().sessions.keys().cloned().collect()
    }

    /// Number of open sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of keys granted by `keygen` and not yet pruned
    #[must_use]
    pub fn grant_count(&self) -> usize {
        self.state.lock().grants.len()
    }

    /// Ids of the sessions subscribed to a channel
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|(_, s)| s.subscriptions.contains(channel))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn open(&self, options: &ConnectOptions) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut state = self.state.lock();
        let refused = state.refusal.clone();
        tracing::debug!(
            id = %id,
            host = %options.host,
            port = options.port,
            refused = refused.is_some(),
            "Loopback session opened"
        );
        state.sessions.insert(
            id.clone(),
            Session {
                username: options.username.clone(),
                online: refused.is_none(),
                refused,
                callbacks: HashMap::new(),
                subscriptions: HashSet::new(),
                watching: HashSet::new(),
            },
        );
        id
    }

    fn register(&self, id: &str, kind: ClientEventKind, callback: ClientCallback) {
        let callback: SharedCallback = Arc::from(callback);
        let immediate = {
            let mut state = self.state.lock();
            let Some(session) = state.sessions.get_mut(id) else {
                return;
            };
            session
                .callbacks
                .entry(kind)
                .or_default()
                .push(Arc::clone(&callback));
            match kind {
                ClientEventKind::Connect if session.online => Some(ClientEvent::Connect),
                ClientEventKind::Error => session.refused.clone().map(ClientEvent::Error),
                _ => None,
            }
        };
        if let Some(event) = immediate {
            callback(event);
        }
    }

    fn subscribe(&self, id: &str, args: ChannelArgs) {
        let mut out = Deliveries::new();
        {
            let mut state = self.state.lock();
            let Some(session) = state.online(id) else {
                return;
            };
            if !state.authorize(&args.key, &args.channel, 'r') {
                session.notify(&unauthorized(), &mut out);
            } else if let Some(session) = state.sessions.get_mut(id) {
                if session.subscriptions.insert(args.channel.clone()) {
                    let event = ClientEvent::Presence(PresencePayload::Subscribe {
                        channel: args.channel.clone(),
                        time: unix_now(),
                        who: session.member(id),
                    });
                    state.notify_watchers(&args.channel, &event, &mut out);
                }
            }
        }
        deliver(out);
    }

    fn unsubscribe(&self, id: &str, args: ChannelArgs) {
        let mut out = Deliveries::new();
        {
            let mut state = self.state.lock();
            let Some(session) = state.online(id) else {
                return;
            };
            if !state.authorize(&args.key, &args.channel, 'r') {
                session.notify(&unauthorized(), &mut out);
            } else if let Some(session) = state.sessions.get_mut(id) {
                if session.subscriptions.remove(&args.channel) {
                    let event = ClientEvent::Presence(PresencePayload::Unsubscribe {
                        channel: args.channel.clone(),
                        time: unix_now(),
                        who: session.member(id),
                    });
                    state.notify_watchers(&args.channel, &event, &mut out);
                }
            }
        }
        deliver(out);
    }

    fn keygen(&self, id: &str, args: KeygenArgs) {
        let mut out = Deliveries::new();
        {
            let mut state = self.state.lock();
            if state.online(id).is_none() {
                return;
            }
            let letters = &args.key_type;
            let valid_type =
                !letters.is_empty() && letters.chars().all(|c| PERMISSION_LETTERS.contains(c));

            let payload = if args.key != state.master_key {
                KeygenPayload::Denied {
                    status: 401,
                    message: "unauthorized".to_string(),
                }
            } else if !valid_type {
                KeygenPayload::Denied {
                    status: 400,
                    message: format!("invalid key type '{}'", args.key_type),
                }
            } else {
                state.prune_expired_grants();
                let key = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
                let expires_at =
                    (args.ttl > 0).then(|| Instant::now() + Duration::from_secs(args.ttl));
                state.grants.insert(
                    key.clone(),
                    Grant {
                        channel: args.channel.clone(),
                        permissions: args.key_type,
                        expires_at,
                    },
                );
                KeygenPayload::Granted {
                    status: 200,
                    key,
                    channel: args.channel,
                }
            };
            if let Some(session) = state.sessions.get(id) {
                session.notify(&ClientEvent::Keygen(payload), &mut out);
            }
        }
        deliver(out);
    }

    fn publish(&self, id: &str, args: PublishArgs) {
        let mut out = Deliveries::new();
        {
            let state = self.state.lock();
            let Some(publisher) = state.online(id) else {
                return;
            };
            if !state.authorize(&args.key, &args.channel, 'w') {
                publisher.notify(&unauthorized(), &mut out);
            } else {
                let event = ClientEvent::Message(ClientMessage {
                    channel: args.channel.clone(),
                    body: args.message.into_bytes(),
                });
                let echo = args.me.unwrap_or(true);
                for (session_id, session) in &state.sessions {
                    if !session.online || !session.subscriptions.contains(&args.channel) {
                        continue;
                    }
                    if !echo && session_id == id {
                        continue;
                    }
                    session.notify(&event, &mut out);
                }
            }
        }
        deliver(out);
    }

    fn me(&self, id: &str) {
        let mut out = Deliveries::new();
        if let Some(session) = self.state.lock().online(id) {
            let event = ClientEvent::Me(MePayload { id: id.to_string() });
            session.notify(&event, &mut out);
        }
        deliver(out);
    }

    fn presence(&self, id: &str, args: PresenceArgs) {
        let mut out = Deliveries::new();
        {
            let mut state = self.state.lock();
            let Some(session) = state.online(id) else {
                return;
            };
            if !state.authorize(&args.key, &args.channel, 'p') {
                session.notify(&unauthorized(), &mut out);
            } else {
                if args.status == Some(true) {
                    let who = state
                        .sessions
                        .iter()
                        .filter(|(_, s)| s.subscriptions.contains(&args.channel))
                        .map(|(member_id, s)| s.member(member_id))
                        .collect();
                    let event = ClientEvent::Presence(PresencePayload::Status {
                        channel: args.channel.clone(),
                        time: unix_now(),
                        who,
                    });
                    session.notify(&event, &mut out);
                }
                if let Some(session) = state.sessions.get_mut(id) {
                    match args.changes {
                        Some(true) => {
                            session.watching.insert(args.channel);
                        }
                        Some(false) => {
                            session.watching.remove(&args.channel);
                        }
                        None => {}
                    }
                }
            }
        }
        deliver(out);
    }

    fn close(&self, id: &str, announce: bool) {
        let mut out = Deliveries::new();
        {
            let mut state = self.state.lock();
            if let Some(session) = state.remove_session(id, &mut out) {
                if announce {
                    session.notify(&ClientEvent::Disconnect, &mut out);
                }
            }
        }
        deliver(out);
    }
}

impl std::fmt::Debug for LoopbackBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBroker")
            .field("session_count", &self.session_count())
            .finish_non_exhaustive()
    }
}

/// Network client whose connections live in a [`LoopbackBroker`]
#[derive(Clone, Debug)]
pub struct LoopbackClient {
    broker: LoopbackBroker,
}

impl LoopbackClient {
    /// Create a client bound to a broker
    #[must_use]
    pub fn new(broker: LoopbackBroker) -> Self {
        Self { broker }
    }
}

impl NetworkClient for LoopbackClient {
    type Connection = LoopbackConnection;

    fn establish(&mut self, options: &ConnectOptions) -> LoopbackConnection {
        let id = self.broker.open(options);
        LoopbackConnection {
            broker: self.broker.clone(),
            id,
            closed: false,
        }
    }
}

/// One session in a [`LoopbackBroker`]
///
/// Dropping the connection without calling `disconnect` removes the session
/// silently, the way a vanished socket would.
#[derive(Debug)]
pub struct LoopbackConnection {
    broker: LoopbackBroker,
    id: String,
    closed: bool,
}

impl LoopbackConnection {
    /// Broker-assigned session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Connection for LoopbackConnection {
    fn on(&mut self, kind: ClientEventKind, callback: ClientCallback) {
        self.broker.register(&self.id, kind, callback);
    }

    fn subscribe(&mut self, args: ChannelArgs) {
        self.broker.subscribe(&self.id, args);
    }

    fn unsubscribe(&mut self, args: ChannelArgs) {
        self.broker.unsubscribe(&self.id, args);
    }

    fn keygen(&mut self, args: KeygenArgs) {
        self.broker.keygen(&self.id, args);
    }

    fn publish(&mut self, args: PublishArgs) {
        self.broker.publish(&self.id, args);
    }

    fn me(&mut self) {
        self.broker.me(&self.id);
    }

    fn presence(&mut self, args: PresenceArgs) {
        self.broker.presence(&self.id, args);
    }

    fn disconnect(&mut self) {
        if !self.closed {
            self.closed = true;
            self.broker.close(&self.id, true);
        }
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.close(&self.id, false);
        }
    }
}
