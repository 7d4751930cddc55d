//! Listener Registry
//!
//! One ordered list of callbacks per event kind. Kinds are the zero-sized
//! markers in [`event`]; each marker fixes the callback signature at compile
//! time, so a connect listener can never be registered under `message`.
//!
//! Listeners are compared by `Arc` identity: registering the same `Arc`
//! twice for one kind is a no-op, and `off` removes only that exact `Arc`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::{
    ErrorPayload, KeygenPayload, MePayload, MessagePayload, PresencePayload, Response,
};

/// Callback for kinds that carry no payload
pub type ControlListener = dyn Fn() + Send + Sync;

/// Callback for kinds that carry a payload of type `T`
pub type PayloadListener<T> = dyn Fn(&T) + Send + Sync;

/// Event kinds a proxy dispatches to listeners
pub mod event {
    /// Connection established
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Connect;

    /// Connection closed, or the relay was declared dead
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Disconnect;

    /// Connection lost, the network client is retrying
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Offline;

    /// Message received on a subscribed channel
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Message;

    /// Opaque network-client error
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Error;

    /// Keygen result, granted or denied
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Keygen;

    /// Presence snapshot or change
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Presence;

    /// Connection information
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Me;
}

/// An event kind and the listener type it accepts
pub trait EventKind: Copy + Send + Sync + 'static {
    /// Callback signature for this kind
    type Listener: ?Sized + Send + Sync + 'static;

    /// Wire tag of the responses dispatched to this kind
    const NAME: &'static str;

    /// The list holding this kind's listeners
    fn list(registry: &Listeners) -> &ListenerList<Self::Listener>;
}

macro_rules! event_kind {
    ($kind:ident, $name:literal, $field:ident, $listener:ty) => {
        impl EventKind for event::$kind {
            type Listener = $listener;
            const NAME: &'static str = $name;

            fn list(registry: &Listeners) -> &ListenerList<Self::Listener> {
                &registry.$field
            }
        }
    };
}

event_kind!(Connect, "connect", connect, ControlListener);
event_kind!(Disconnect, "disconnect", disconnect, ControlListener);
event_kind!(Offline, "offline", offline, ControlListener);
event_kind!(Message, "message", message, PayloadListener<MessagePayload>);
event_kind!(Error, "error", error, PayloadListener<ErrorPayload>);
event_kind!(Keygen, "keygen", keygen, PayloadListener<KeygenPayload>);
event_kind!(Presence, "presence", presence, PayloadListener<PresencePayload>);
event_kind!(Me, "me", me, PayloadListener<MePayload>);

/// Ordered, duplicate-free list of listeners of one kind
pub struct ListenerList<L: ?Sized> {
    entries: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerList<L> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerList<L> {
    /// Append a listener; returns `false` if it was already registered
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|entry| Arc::ptr_eq(entry, &listener)) {
            return false;
        }
        entries.push(listener);
        true
    }

    /// Remove exactly this listener; returns `false` if it was not registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|existing| !Arc::ptr_eq(existing, listener));
        entries.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the current list, taken so callbacks run without the lock held
    fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries.lock().clone()
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerList<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerList")
            .field("len", &self.len())
            .finish()
    }
}

/// All listener lists of one proxy
#[derive(Default, Debug)]
pub struct Listeners {
    connect: ListenerList<ControlListener>,
    disconnect: ListenerList<ControlListener>,
    offline: ListenerList<ControlListener>,
    message: ListenerList<PayloadListener<MessagePayload>>,
    error: ListenerList<PayloadListener<ErrorPayload>>,
    keygen: ListenerList<PayloadListener<KeygenPayload>>,
    presence: ListenerList<PayloadListener<PresencePayload>>,
    me: ListenerList<PayloadListener<MePayload>>,
}

impl Listeners {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `K`
    pub fn on<K: EventKind>(&self, listener: Arc<K::Listener>) -> bool {
        K::list(self).add(listener)
    }

    /// Unregister a listener for `K`
    pub fn off<K: EventKind>(&self, listener: &Arc<K::Listener>) -> bool {
        K::list(self).remove(listener)
    }

    /// Number of listeners registered for `K`
    #[must_use]
    pub fn count<K: EventKind>(&self) -> usize {
        K::list(self).len()
    }

    /// Invoke every listener registered for the response's kind, in order
    ///
    /// Returns how many listeners ran. `pong` is not a listener kind and
    /// reaches nobody.
    pub fn dispatch(&self, response: &Response) -> usize {
        match response {
            Response::Connect => notify(&self.connect),
            Response::Disconnect => notify(&self.disconnect),
            Response::Offline => notify(&self.offline),
            Response::Error(payload) => deliver(&self.error, payload),
            Response::Message(payload) => deliver(&self.message, payload),
            Response::Keygen(payload) => deliver(&self.keygen, payload),
            Response::Presence(payload) => deliver(&self.presence, payload),
            Response::Me(payload) => deliver(&self.me, payload),
            Response::Pong => 0,
        }
    }
}

fn notify(list: &ListenerList<ControlListener>) -> usize {
    let listeners = list.snapshot();
    for listener in &listeners {
        listener();
    }
    listeners.len()
}

fn deliver<T>(list: &ListenerList<PayloadListener<T>>, payload: &T) -> usize {
    let listeners = list.snapshot();
    for listener in &listeners {
        listener(payload);
    }
    listeners.len()
}
