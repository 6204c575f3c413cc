use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::codec::{Codec, JsonCodec};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, StatusCallback};
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::error::Result;
use crate::multiplexer::{CallHandle, RequestMultiplexer};
use crate::protocol::{decode_payload, encode_payload, Action, PushEvent, ServerEvent};
use crate::router::Router;
use crate::transport::{Address, Connector, WsConnector};

/// One backend connection with its calls and event listeners
///
/// Independent instances share nothing. Dropping the client disconnects it
/// and fails any calls still pending.
pub struct Client<C: Codec + Clone = JsonCodec> {
    config: ClientConfig,
    connection: ConnectionManager<C>,
    multiplexer: RequestMultiplexer<C>,
    dispatcher: EventDispatcher,
    observer: Arc<Mutex<Option<StatusCallback>>>,
}

impl Client<JsonCodec> {
    pub fn new(connector: impl Connector + 'static, config: ClientConfig) -> Self {
        Self::with_codec(connector, config, JsonCodec)
    }

    /// Client speaking JSON over WebSocket, the backend's native transport
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(WsConnector::new(), config)
    }
}

impl<C: Codec + Clone> Client<C> {
    pub fn with_codec(connector: impl Connector + 'static, config: ClientConfig, codec: C) -> Self {
        let connection =
            ConnectionManager::with_codec(connector, config.reconnect.clone(), codec.clone());
        let multiplexer = RequestMultiplexer::new(connection.clone(), config.request_timeout());
        let dispatcher = EventDispatcher::new();
        let observer: Arc<Mutex<Option<StatusCallback>>> = Arc::default();

        let router = Router::new(codec, multiplexer.clone(), dispatcher.clone());
        connection.set_frame_handler(move |frame| {
            router.route(&frame);
        });

        {
            let multiplexer = multiplexer.clone();
            let observer = Arc::clone(&observer);
            connection.set_status_callback(move |state| {
                if !state.is_connected() {
                    let rejected = multiplexer.reject_all();
                    if rejected > 0 {
                        debug!(rejected, %state, "link lost with calls in flight");
                    }
                }
                let callback = observer.lock().clone();
                if let Some(callback) = callback {
                    callback(state);
                }
            });
        }

        Self {
            config,
            connection,
            multiplexer,
            dispatcher,
            observer,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Set the callback told about every connection state change
    pub fn set_status_callback(&self, callback: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Arc::new(callback));
    }

    pub fn connect(&self, address: Address) {
        self.connection.connect(address);
    }

    /// Connect to the configured backend, preferring `host_port` when the
    /// host application supplies one
    pub fn connect_backend(&self, host_port: Option<u16>) {
        self.connection.connect(self.config.backend.resolve(host_port));
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    /// Untyped call; see [`RequestMultiplexer::call`]
    pub fn call(&self, action: impl Into<String>, payload: Option<Value>) -> CallHandle {
        self.multiplexer.call(action, payload)
    }

    /// Typed call: payload and reply are checked against the action's schema
    pub async fn invoke<A: Action>(&self, action: &A) -> Result<A::Reply> {
        let payload = encode_payload(action)?;
        let reply = self.multiplexer.call(A::NAME, payload).await?;
        decode_payload(A::NAME, &reply)
    }

    /// Untyped listener for `event`
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.subscribe(event, listener)
    }

    /// Typed listener; payloads that do not match `E` are logged and skipped
    pub fn on<E, F>(&self, listener: F) -> Subscription
    where
        E: PushEvent,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.dispatcher
            .subscribe(E::NAME, move |payload| match decode_payload::<E>(E::NAME, payload) {
                Ok(event) => listener(event),
                Err(e) => warn!(event = E::NAME, error = %e, "dropping invalid event payload"),
            })
    }

    /// Listen to every protocol event through one callback
    pub fn on_server_event(
        &self,
        listener: impl Fn(ServerEvent) + Send + Sync + 'static,
    ) -> Vec<Subscription> {
        let listener = Arc::new(listener);
        ServerEvent::NAMES
            .into_iter()
            .map(|name| {
                let listener = Arc::clone(&listener);
                self.dispatcher.subscribe(name, move |payload| {
                    match ServerEvent::decode(name, payload) {
                        Ok(Some(event)) => listener(event),
                        Ok(None) => {}
                        Err(e) => warn!(event = name, error = %e, "dropping invalid event payload"),
                    }
                })
            })
            .collect()
    }

    pub fn pending_calls(&self) -> usize {
        self.multiplexer.pending_count()
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }
}

impl<C: Codec + Clone> Drop for Client<C> {
    fn drop(&mut self) {
        self.connection.disconnect();
        // The handlers hold clones of this client's parts.
        self.connection.clear_handlers();
    }
}
