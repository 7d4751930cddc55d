//! Background Relay
//!
//! Lives in the isolated context and owns the single connection to the
//! network client. Each request frame from the proxy is translated into one
//! call on that connection; each connection event is repackaged as a response
//! frame and sent back.
//!
//! # Dispatch table
//!
//! | Request       | With connection                 | Without connection        |
//! |---------------|---------------------------------|---------------------------|
//! | `start`       | ignored (already connected)     | establish + register      |
//! | `ping`        | reply `pong`                    | reply `pong`              |
//! | `disconnect`  | close, clear handle             | ignored                   |
//! | anything else | forwarded 1:1                   | logged and dropped        |
//!
//! Requests dropped for lack of a connection are never reported to the
//! proxy; callers must wait for a `connect` event before issuing them.

use serde_json::Value;

use crate::client::{
    ChannelArgs, ClientCallback, ClientEvent, ClientEventKind, Connection, KeygenArgs,
    NetworkClient, PresenceArgs, PublishArgs,
};
use crate::protocol::{
    self, ChannelRequest, ConnectOptions, ErrorPayload, KeygenRequest, MessagePayload,
    PresenceRequest, PublishRequest, Request, Response,
};
use crate::transport::{FrameReceiver, FrameSender};

/// The relay side of the bridge
pub struct Relay<C: NetworkClient> {
    /// Opens the connection on `start`
    client: C,
    /// The one connection this relay may hold
    connection: Option<C::Connection>,
    /// Responses towards the proxy
    responses: FrameSender,
}

impl<C: NetworkClient> Relay<C> {
    /// Create a relay that answers on `responses`
    #[must_use]
    pub fn new(client: C, responses: FrameSender) -> Self {
        Self {
            client,
            connection: None,
            responses,
        }
    }

    /// Whether a connection is currently held
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Process request frames one at a time until the proxy goes away
    ///
    /// The connection, if any, is closed when the channel closes.
    pub async fn run(mut self, mut requests: FrameReceiver) {
        tracing::debug!("Relay started");

        while let Some(frame) = requests.recv().await {
            self.handle_frame(frame);
        }

        tracing::debug!("Request channel closed, relay stopping");
        self.disconnect();
    }

    /// Decode and handle one frame; unknown frames are ignored
    pub fn handle_frame(&mut self, frame: Value) {
        if let Some(request) = protocol::decode_request(frame) {
            self.handle(request);
        }
    }

    /// Handle one request
    pub fn handle(&mut self, request: Request) {
        tracing::trace!(tag = request.tag(), "Request received");

        match request {
            Request::Start(options) => self.start(&options),
            Request::Ping => self.reply(&Response::Pong),
            Request::Disconnect => self.disconnect(),
            Request::Subscribe(ChannelRequest { key, channel }) => {
                self.with_connection("subscribe to channel", |c| {
                    c.subscribe(ChannelArgs { key, channel });
                });
            }
            Request::Unsubscribe(ChannelRequest { key, channel }) => {
                self.with_connection("unsubscribe from channel", |c| {
                    c.unsubscribe(ChannelArgs { key, channel });
                });
            }
            Request::Keygen(KeygenRequest {
                key,
                channel,
                permissions,
                ttl,
            }) => {
                self.with_connection("generate key", |c| {
                    c.keygen(KeygenArgs {
                        key,
                        channel,
                        key_type: permissions,
                        ttl,
                    });
                });
            }
            Request::Publish(PublishRequest {
                key,
                channel,
                message,
                me,
                ttl,
            }) => {
                self.with_connection("publish", |c| {
                    c.publish(PublishArgs {
                        key,
                        channel,
                        message,
                        me,
                        ttl,
                    });
                });
            }
            Request::Me => self.with_connection("request connection info", |c| c.me()),
            Request::Presence(PresenceRequest {
                key,
                channel,
                status,
                changes,
            }) => {
                self.with_connection("request presence information", |c| {
                    c.presence(PresenceArgs {
                        key,
                        channel,
                        status,
                        changes,
                    });
                });
            }
        }
    }

    fn start(&mut self, options: &ConnectOptions) {
        if self.connection.is_some() {
            tracing::debug!("Start received while connected, ignoring");
            return;
        }

        tracing::info!(
            host = %options.host,
            port = options.port,
            secure = options.secure,
            "Opening network connection"
        );

        let mut connection = self.client.establish(options);
        for kind in ClientEventKind::ALL {
            connection.on(kind, self.forwarder());
        }
        self.connection = Some(connection);
    }

    fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect();
            tracing::info!("Network connection closed");
        }
    }

    fn with_connection(&mut self, action: &str, call: impl FnOnce(&mut C::Connection)) {
        match self.connection.as_mut() {
            Some(connection) => call(connection),
            None => tracing::error!("Cannot {action}: not connected"),
        }
    }

    fn reply(&self, response: &Response) {
        if let Err(e) = self.responses.send(response) {
            tracing::debug!(tag = response.tag(), error = %e, "Dropping response");
        }
    }

    /// Callback that repackages a connection event and sends it to the proxy
    fn forwarder(&self) -> ClientCallback {
        let responses = self.responses.clone();
        Box::new(move |event| {
            let response = into_response(event);
            if let Err(e) = responses.send(&response) {
                tracing::debug!(tag = response.tag(), error = %e, "Dropping client event");
            }
        })
    }
}

impl<C: NetworkClient> std::fmt::Debug for Relay<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn into_response(event: ClientEvent) -> Response {
    match event {
        ClientEvent::Connect => Response::Connect,
        ClientEvent::Disconnect => Response::Disconnect,
        ClientEvent::Offline => Response::Offline,
        ClientEvent::Error(error) => Response::Error(ErrorPayload { error }),
        ClientEvent::Message(message) => Response::Message(MessagePayload {
            message: message.as_string(),
            channel: message.channel,
        }),
        ClientEvent::Keygen(payload) => Response::Keygen(payload),
        ClientEvent::Presence(payload) => Response::Presence(payload),
        ClientEvent::Me(payload) => Response::Me(payload),
    }
}
