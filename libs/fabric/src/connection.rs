//! Connection lifecycle
//!
//! [`ConnectionManager`] owns the single logical link to the backend:
//!
//! ```text
//! Disconnected --connect--> Connecting --open--> Connected
//!      ^                      |    ^                 |
//!      |        (exhausted)   |    | (timer)         | unsolicited close
//!      +----------------------+    +--- Reconnecting <+
//! ```
//!
//! `disconnect` moves every state to `Disconnected` and suppresses automatic
//! reconnection until the next explicit `connect`.
//!
//! Every link gets a generation number. Tasks spawned for an older generation
//! find the number changed and become no-ops, so a late close or a late open
//! from a superseded link never disturbs the current one.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{Codec, JsonCodec};
use crate::config::ReconnectConfig;
use crate::error::{Error, Result};
use crate::transport::{Address, Connector, FrameSink, Link};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Invoked after every state transition
pub type StatusCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Invoked for every inbound frame, in arrival order
pub type FrameHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

struct LinkState {
    state: ConnectionState,
    address: Option<Address>,
    attempts: u32,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    link_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    link: Mutex<LinkState>,
    on_status: Mutex<Option<StatusCallback>>,
    on_frame: Mutex<Option<FrameHandler>>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Owner of the backend link
///
/// Cloning yields another handle to the same connection. All methods return
/// immediately; opening, reading and reconnecting happen on spawned tokio
/// tasks, so `connect` must be called from within a runtime.
pub struct ConnectionManager<C = JsonCodec> {
    shared: Arc<Shared>,
    codec: C,
}

impl<C: Clone> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            codec: self.codec.clone(),
        }
    }
}

impl ConnectionManager<JsonCodec> {
    pub fn new(connector: impl Connector + 'static, reconnect: ReconnectConfig) -> Self {
        Self::with_codec(connector, reconnect, JsonCodec)
    }
}

impl<C: Codec> ConnectionManager<C> {
    pub fn with_codec(connector: impl Connector + 'static, reconnect: ReconnectConfig, codec: C) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector: Arc::new(connector),
                reconnect,
                link: Mutex::new(LinkState {
                    state: ConnectionState::Disconnected,
                    address: None,
                    attempts: 0,
                    generation: 0,
                    outbound: None,
                    link_task: None,
                    reconnect_timer: None,
                }),
                on_status: Mutex::new(None),
                on_frame: Mutex::new(None),
                state_tx,
            }),
            codec,
        }
    }

    /// Replace the status callback
    pub fn set_status_callback(&self, callback: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *self.shared.on_status.lock() = Some(Arc::new(callback));
    }

    /// Replace the handler receiving inbound frames
    pub fn set_frame_handler(&self, handler: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        *self.shared.on_frame.lock() = Some(Arc::new(handler));
    }

    /// Drop both callbacks
    pub(crate) fn clear_handlers(&self) {
        *self.shared.on_status.lock() = None;
        *self.shared.on_frame.lock() = None;
    }

    /// Open a link to `address`.
    ///
    /// No-op while a link is already open or opening. From `Reconnecting`
    /// the pending reconnect timer is cancelled and the attempt starts now.
    pub fn connect(&self, address: Address) {
        let change = {
            let mut link = self.shared.link.lock();
            if matches!(
                link.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(%address, state = %link.state, "connect ignored");
                return;
            }
            self.shared.begin_connect(&mut link, address)
        };
        self.shared.notify(change);
    }

    /// Close the link and stop reconnecting.
    pub fn disconnect(&self) {
        let change = {
            let mut link = self.shared.link.lock();
            if let Some(timer) = link.reconnect_timer.take() {
                timer.abort();
            }
            link.attempts = self.shared.reconnect.max_attempts;
            link.generation += 1;
            // Dropping the sender lets the writer flush and close the sink.
            link.outbound = None;
            if let Some(task) = link.link_task.take() {
                task.abort();
            }
            self.shared
                .set_state(&mut link, ConnectionState::Disconnected)
        };
        if change.is_some() {
            info!("disconnected");
        }
        self.shared.notify(change);
    }

    /// Serialize `message` and queue it on the open link
    pub fn send<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let frame = self.codec.encode(message)?;
        self.send_frame(frame)
    }

    /// Queue a pre-encoded frame on the open link
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        let link = self.shared.link.lock();
        if link.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let tx = link.outbound.as_ref().ok_or(Error::NotConnected)?;
        tx.send(frame).map_err(|_| Error::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        let link = self.shared.link.lock();
        link.state == ConnectionState::Connected
            && link.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.lock().state
    }

    /// Consecutive reconnect attempts since the last successful open
    pub fn attempts(&self) -> u32 {
        self.shared.link.lock().attempts
    }

    /// Address of the current or most recent link
    pub fn address(&self) -> Option<Address> {
        self.shared.link.lock().address.clone()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl Shared {
    fn set_state(&self, link: &mut LinkState, next: ConnectionState) -> Option<ConnectionState> {
        if link.state == next {
            return None;
        }
        debug!(from = %link.state, to = %next, "connection state changed");
        link.state = next;
        self.state_tx.send_replace(next);
        Some(next)
    }

    /// Run the status callback. Never called with the link lock held.
    fn notify(&self, change: Option<ConnectionState>) {
        let Some(state) = change else { return };
        let callback = self.on_status.lock().clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    fn deliver(&self, frame: Vec<u8>) {
        let handler = self.on_frame.lock().clone();
        match handler {
            Some(handler) => handler(frame),
            None => debug!(len = frame.len(), "no frame handler, dropping frame"),
        }
    }

    fn begin_connect(self: &Arc<Self>, link: &mut LinkState, address: Address) -> Option<ConnectionState> {
        if let Some(timer) = link.reconnect_timer.take() {
            timer.abort();
        }
        link.generation += 1;
        link.address = Some(address.clone());

        let generation = link.generation;
        let shared = Arc::clone(self);
        link.link_task = Some(tokio::spawn(async move {
            shared.run_link(generation, address).await;
        }));

        self.set_state(link, ConnectionState::Connecting)
    }

    /// Open the link, then read from it until it closes.
    async fn run_link(self: Arc<Self>, generation: u64, address: Address) {
        info!(%address, "connecting");
        let Link { sink, mut source } = match self.connector.connect(&address).await {
            Ok(link) => link,
            Err(e) => {
                warn!(%address, error = %e, "connect failed");
                self.handle_close(generation);
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let opened = {
            let mut link = self.link.lock();
            if link.generation == generation {
                link.attempts = 0;
                link.outbound = Some(tx);
                Some(self.set_state(&mut link, ConnectionState::Connected))
            } else {
                None
            }
        };
        let Some(change) = opened else {
            debug!(%address, "link superseded before open");
            let mut sink = sink;
            let _ = sink.close().await;
            return;
        };

        info!(%address, "connected");
        tokio::spawn(Arc::clone(&self).write_loop(generation, sink, rx));
        self.notify(change);

        loop {
            match source.receive().await {
                Ok(frame) => self.deliver(frame),
                Err(Error::ConnectionClosed) => {
                    debug!(%address, "peer closed the link");
                    break;
                }
                Err(e) => {
                    warn!(%address, error = %e, "receive failed");
                    break;
                }
            }
        }

        self.handle_close(generation);
    }

    async fn write_loop(
        self: Arc<Self>,
        generation: u64,
        mut sink: Box<dyn FrameSink>,
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(&frame).await {
                warn!(error = %e, "send failed");
                let _ = sink.close().await;
                self.handle_close(generation);
                return;
            }
        }
        let _ = sink.close().await;
    }

    /// React to a link closing on its own (or failing to open).
    fn handle_close(self: &Arc<Self>, generation: u64) {
        let change = {
            let mut link = self.link.lock();
            if link.generation != generation
                || !matches!(
                    link.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                )
            {
                return;
            }
            link.outbound = None;
            if let Some(task) = link.link_task.take() {
                task.abort();
            }

            let next = if link.attempts < self.reconnect.max_attempts {
                link.attempts += 1;
                let attempt = link.attempts;
                let delay = self.reconnect.delay(attempt);
                info!(
                    attempt,
                    max_attempts = self.reconnect.max_attempts,
                    ?delay,
                    "scheduling reconnect"
                );
                let shared = Arc::clone(self);
                link.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.fire_reconnect();
                }));
                ConnectionState::Reconnecting
            } else {
                warn!(
                    attempts = link.attempts,
                    "reconnect attempts exhausted, staying disconnected"
                );
                ConnectionState::Disconnected
            };
            self.set_state(&mut link, next)
        };
        self.notify(change);
    }

    fn fire_reconnect(self: &Arc<Self>) {
        let change = {
            let mut link = self.link.lock();
            if link.state != ConnectionState::Reconnecting {
                return;
            }
            // This is the timer task itself; let it finish instead of aborting it.
            link.reconnect_timer = None;
            let Some(address) = link.address.clone() else {
                return;
            };
            debug!(attempt = link.attempts, %address, "reconnect timer fired");
            self.begin_connect(&mut link, address)
        };
        self.notify(change);
    }
}
