//! Integration tests for the proxy/relay bridge
//!
//! These tests drive a real [`RelayProxy`] whose relays run as tasks on top
//! of the in-memory loopback broker. Tests cover:
//! - The connect round trip and listener dispatch
//! - Keygen, subscribe, publish and the `me` echo flag
//! - Presence snapshots and change notifications across two proxies
//! - Network-client errors, refusals and offline transitions
//! - Disconnect and reconnect
//! - Configuration feeding the proxy

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::NamedTempFile;

use bridge_core::client::loopback::{LoopbackBroker, LoopbackClient};
use bridge_core::config::load_config_from_path;
use bridge_core::{
    event, ConnectOptions, ErrorPayload, HeartbeatConfig, KeygenPayload, Liveness, MePayload,
    MessagePayload, PresencePayload, RelayProxy, Response, TaskLauncher,
};

const MASTER: &str = "master-key";

// =============================================================================
// Test Infrastructure
// =============================================================================

/// Every event a proxy dispatched, in order
#[derive(Clone, Default)]
struct EventLog {
    events: Arc<Mutex<Vec<Response>>>,
}

impl EventLog {
    fn attach(proxy: &RelayProxy) -> Self {
        let log = Self::default();

        let sink = log.events.clone();
        proxy.on(
            event::Connect,
            Arc::new(move || sink.lock().push(Response::Connect)),
        );
        let sink = log.events.clone();
        proxy.on(
            event::Disconnect,
            Arc::new(move || sink.lock().push(Response::Disconnect)),
        );
        let sink = log.events.clone();
        proxy.on(
            event::Offline,
            Arc::new(move || sink.lock().push(Response::Offline)),
        );
        let sink = log.events.clone();
        proxy.on(
            event::Error,
            Arc::new(move |p: &ErrorPayload| sink.lock().push(Response::Error(p.clone()))),
        );
        let sink = log.events.clone();
        proxy.on(
            event::Message,
            Arc::new(move |p: &MessagePayload| sink.lock().push(Response::Message(p.clone()))),
        );
        let sink = log.events.clone();
        proxy.on(
            event::Keygen,
            Arc::new(move |p: &KeygenPayload| sink.lock().push(Response::Keygen(p.clone()))),
        );
        let sink = log.events.clone();
        proxy.on(
            event::Presence,
            Arc::new(move |p: &PresencePayload| sink.lock().push(Response::Presence(p.clone()))),
        );
        let sink = log.events.clone();
        proxy.on(
            event::Me,
            Arc::new(move |p: &MePayload| sink.lock().push(Response::Me(p.clone()))),
        );

        log
    }

    fn tags(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(Response::tag).collect()
    }

    fn count(&self, tag: &str) -> usize {
        self.tags().into_iter().filter(|t| *t == tag).count()
    }

    fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|r| match r {
                Response::Message(m) => Some(m.message.clone()),
                _ => None,
            })
            .collect()
    }

    fn granted_key(&self) -> Option<String> {
        self.events.lock().iter().rev().find_map(|r| match r {
            Response::Keygen(KeygenPayload::Granted { key, .. }) => Some(key.clone()),
            _ => None,
        })
    }

    fn last(&self) -> Option<Response> {
        self.events.lock().last().cloned()
    }
}

fn loopback_proxy(broker: &LoopbackBroker, config: HeartbeatConfig) -> RelayProxy {
    let broker = broker.clone();
    let launcher = TaskLauncher::new(move || LoopbackClient::new(broker.clone()));
    RelayProxy::new(launcher, config).unwrap()
}

fn options(username: &str) -> ConnectOptions {
    ConnectOptions::new("loopback", 8080, false).with_username(username)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Round Trips
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_round_trip() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    settle().await;

    assert_eq!(log.tags(), vec!["connect"]);
    assert_eq!(proxy.liveness(), Liveness::Monitoring);
    assert_eq!(broker.session_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keygen_subscribe_publish() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    settle().await;

    proxy.keygen(MASTER, "chat/", "rw", 0).unwrap();
    settle().await;
    let key = log.granted_key().expect("keygen should be granted");

    proxy.subscribe(&key, "chat/").unwrap();
    proxy.publish(&key, "chat/", "hello", None, None).unwrap();
    settle().await;
    assert_eq!(log.messages(), vec!["hello"]);

    // me = false skips the publisher
    proxy
        .publish(&key, "chat/", "quiet", Some(false), None)
        .unwrap();
    settle().await;
    assert_eq!(log.messages(), vec!["hello"]);

    proxy.unsubscribe(&key, "chat/").unwrap();
    proxy.publish(&key, "chat/", "gone", None, None).unwrap();
    settle().await;
    assert_eq!(log.messages(), vec!["hello"]);
}

#[tokio::test(start_paused = true)]
async fn test_keygen_denied_shares_kind() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    proxy.keygen("not-the-master", "chat/", "r", 0).unwrap();
    proxy.keygen(MASTER, "chat/", "rz", 0).unwrap();
    settle().await;

    assert_eq!(log.tags(), vec!["connect", "keygen", "keygen"]);
    let events = log.events.lock();
    match (&events[1], &events[2]) {
        (Response::Keygen(first), Response::Keygen(second)) => {
            assert_eq!(first.status(), 401);
            assert_eq!(second.status(), 400);
            assert!(!first.is_granted() && !second.is_granted());
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_me_reports_session_id() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    proxy.me().unwrap();
    settle().await;

    match log.last() {
        Some(Response::Me(MePayload { id })) => assert_eq!(broker.session_ids(), vec![id]),
        other => panic!("expected me, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_presence_across_two_proxies() {
    let broker = LoopbackBroker::new(MASTER);
    let alice = loopback_proxy(&broker, HeartbeatConfig::default());
    let bob = loopback_proxy(&broker, HeartbeatConfig::default());
    let alice_log = EventLog::attach(&alice);
    let bob_log = EventLog::attach(&bob);

    alice.connect(options("alice")).unwrap();
    bob.connect(options("bob")).unwrap();
    settle().await;

    alice.subscribe(MASTER, "room/").unwrap();
    bob.subscribe(MASTER, "room/").unwrap();
    settle().await;

    alice
        .presence(MASTER, "room/", Some(true), Some(true))
        .unwrap();
    settle().await;

    match alice_log.last() {
        Some(Response::Presence(PresencePayload::Status { channel, who, .. })) => {
            assert_eq!(channel, "room/");
            let mut names: Vec<_> = who.iter().filter_map(|m| m.username.clone()).collect();
            names.sort();
            assert_eq!(names, vec!["alice", "bob"]);
        }
        other => panic!("expected presence status, got {other:?}"),
    }

    bob.unsubscribe(MASTER, "room/").unwrap();
    settle().await;

    match alice_log.last() {
        Some(Response::Presence(PresencePayload::Unsubscribe { who, .. })) => {
            assert_eq!(who.username.as_deref(), Some("bob"));
        }
        other => panic!("expected presence unsubscribe, got {other:?}"),
    }

    // Bob publishes, Alice receives
    alice.presence(MASTER, "room/", None, Some(false)).unwrap();
    bob.publish(MASTER, "room/", "hi alice", None, None)
        .unwrap();
    settle().await;
    assert_eq!(alice_log.messages(), vec!["hi alice"]);
    assert!(bob_log.messages().is_empty());
}

// =============================================================================
// Network-Client Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unauthorized_subscribe_reports_error() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    proxy.subscribe("bogus", "chat/").unwrap();
    settle().await;

    assert_eq!(
        log.last(),
        Some(Response::Error(ErrorPayload {
            error: json!({"status": 401, "message": "unauthorized"}),
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_refused_connection_reports_error_only() {
    let broker = LoopbackBroker::new(MASTER);
    broker.refuse_connections(json!({"status": 503, "message": "maintenance"}));
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    settle().await;

    assert_eq!(
        log.events.lock().clone(),
        vec![Response::Error(ErrorPayload {
            error: json!({"status": 503, "message": "maintenance"}),
        })]
    );
    // The relay itself is healthy and keeps answering pings
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(proxy.liveness(), Liveness::Monitoring);
}

#[tokio::test(start_paused = true)]
async fn test_offline_and_back() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    settle().await;
    broker.go_offline();
    broker.come_online();
    settle().await;

    assert_eq!(log.tags(), vec!["connect", "offline", "connect"]);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_and_reconnect() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    settle().await;
    proxy.disconnect().unwrap();
    settle().await;

    assert_eq!(log.tags(), vec!["connect", "disconnect"]);
    assert_eq!(broker.session_count(), 0);
    assert_eq!(proxy.liveness(), Liveness::Idle);

    // Dropped by the relay: no connection, no response
    proxy.subscribe(MASTER, "chat/").unwrap();
    settle().await;
    assert_eq!(log.tags().len(), 2);

    proxy.connect(options("alice")).unwrap();
    settle().await;
    assert_eq!(log.tags(), vec!["connect", "disconnect", "connect"]);
    assert_eq!(broker.session_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_relay_keeps_heartbeat_at_zero() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());
    let log = EventLog::attach(&proxy);

    proxy.connect(options("alice")).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(proxy.liveness(), Liveness::Monitoring);
    assert_eq!(proxy.unanswered_pings(), 0);
    assert_eq!(log.count("disconnect"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_proxy_closes_session() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::default());

    proxy.connect(options("alice")).unwrap();
    settle().await;
    assert_eq!(broker.session_count(), 1);

    drop(proxy);
    settle().await;
    assert_eq!(broker.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_methods_callable_from_plain_thread() {
    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, HeartbeatConfig::disabled());
    let log = EventLog::attach(&proxy);

    let remote = proxy.clone();
    std::thread::spawn(move || {
        remote.connect(options("alice")).unwrap();
        remote.subscribe(MASTER, "chat/").unwrap();
        remote
            .publish(MASTER, "chat/", "from a thread", None, None)
            .unwrap();
    })
    .join()
    .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));
    proxy.on(
        event::Me,
        Arc::new(move |_: &MePayload| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
        }),
    );
    proxy.me().unwrap();
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(log.messages(), vec!["from a thread"]);
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_config_file_drives_proxy() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[heartbeat]
interval_ms = 200
max_unanswered_pings = 2

[client]
host = "loopback"
port = 1883
username = "configured"
"#,
    )
    .unwrap();

    let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(config.heartbeat.interval, Duration::from_millis(200));

    let broker = LoopbackBroker::new(MASTER);
    let proxy = loopback_proxy(&broker, config.heartbeat.clone());
    let log = EventLog::attach(&proxy);

    proxy.connect(config.client.clone()).unwrap();
    proxy.subscribe(MASTER, "cfg/").unwrap();
    proxy.presence(MASTER, "cfg/", Some(true), None).unwrap();
    settle().await;

    match log.last() {
        Some(Response::Presence(PresencePayload::Status { who, .. })) => {
            assert_eq!(who.len(), 1);
            assert_eq!(who[0].username.as_deref(), Some("configured"));
        }
        other => panic!("expected presence status, got {other:?}"),
    }
}
