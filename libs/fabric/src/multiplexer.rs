//! Correlated calls over the shared link
//!
//! Each call gets a fresh id and an independent deadline. Whichever comes
//! first of the matching reply, the deadline, or a connection loss settles the
//! call; settling removes the entry, so later events for the same id find
//! nothing and are ignored.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use flowlink_core::{InboundEnvelope, OutboundEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::{Codec, JsonCodec};
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};

struct PendingCall {
    action: String,
    reply_tx: oneshot::Sender<Result<Value>>,
    deadline: JoinHandle<()>,
    created_at: Instant,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingCall>>>;

pub struct RequestMultiplexer<C = JsonCodec> {
    connection: ConnectionManager<C>,
    pending: PendingTable,
    timeout: Duration,
}

impl<C: Clone> Clone for RequestMultiplexer<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            pending: Arc::clone(&self.pending),
            timeout: self.timeout,
        }
    }
}

impl<C: Codec> RequestMultiplexer<C> {
    pub fn new(connection: ConnectionManager<C>, timeout: Duration) -> Self {
        Self {
            connection,
            pending: Arc::default(),
            timeout,
        }
    }

    /// Issue `action` and return a handle that settles with the reply.
    ///
    /// When the link is down the handle is already failed with
    /// [`Error::NotConnected`] and nothing is registered.
    pub fn call(&self, action: impl Into<String>, payload: Option<Value>) -> CallHandle {
        let action = action.into();
        if !self.connection.is_connected() {
            debug!(%action, "call while not connected");
            return CallHandle::failed(Error::NotConnected);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock();
            let id = loop {
                let candidate = Uuid::new_v4().to_string();
                if !pending.contains_key(&candidate) {
                    break candidate;
                }
            };
            let deadline = tokio::spawn(expire(
                Arc::clone(&self.pending),
                id.clone(),
                self.timeout,
            ));
            pending.insert(
                id.clone(),
                PendingCall {
                    action: action.clone(),
                    reply_tx,
                    deadline,
                    created_at: Instant::now(),
                },
            );
            id
        };

        debug!(%id, %action, "call issued");
        let envelope = OutboundEnvelope::new(id.clone(), action, payload);
        if let Err(e) = self.connection.send(&envelope) {
            if let Some(call) = self.pending.lock().remove(&id) {
                call.deadline.abort();
            }
            return CallHandle::failed(e);
        }

        CallHandle {
            id: Some(id),
            state: CallState::Waiting(reply_rx),
        }
    }

    /// Issue `action` and wait for its outcome
    pub async fn request(&self, action: impl Into<String>, payload: Option<Value>) -> Result<Value> {
        self.call(action, payload).await
    }

    /// Settle the call `envelope` answers.
    ///
    /// Returns the envelope back when it answers no pending call.
    pub fn resolve(&self, envelope: InboundEnvelope) -> Option<InboundEnvelope> {
        let call = match envelope.id.as_deref() {
            Some(id) => self.pending.lock().remove(id),
            None => None,
        };
        let Some(call) = call else {
            return Some(envelope);
        };
        call.deadline.abort();

        let outcome = if envelope.is_error() {
            Err(Error::Protocol(envelope.error_message()))
        } else {
            Ok(envelope.into_payload())
        };
        debug!(
            action = %call.action,
            ok = outcome.is_ok(),
            elapsed = ?call.created_at.elapsed(),
            "call settled"
        );
        let _ = call.reply_tx.send(outcome);
        None
    }

    /// Fail every pending call with [`Error::ConnectionClosed`]
    pub fn reject_all(&self) -> usize {
        let drained: Vec<PendingCall> = self.pending.lock().drain().map(|(_, call)| call).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "rejecting pending calls");
        }
        let count = drained.len();
        for call in drained {
            call.deadline.abort();
            let _ = call.reply_tx.send(Err(Error::ConnectionClosed));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

async fn expire(pending: PendingTable, id: String, after: Duration) {
    tokio::time::sleep(after).await;
    let call = pending.lock().remove(&id);
    if let Some(call) = call {
        warn!(%id, action = %call.action, ?after, "call timed out");
        let _ = call.reply_tx.send(Err(Error::Timeout {
            action: call.action,
            after,
        }));
    }
}

enum CallState {
    Failed(Option<Error>),
    Waiting(oneshot::Receiver<Result<Value>>),
}

/// Eventual outcome of one call
pub struct CallHandle {
    id: Option<String>,
    state: CallState,
}

impl CallHandle {
    fn failed(error: Error) -> Self {
        Self {
            id: None,
            state: CallState::Failed(Some(error)),
        }
    }

    /// Correlation id, if the call reached the wire
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl Future for CallHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            CallState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(Error::ConnectionClosed)))
            }
            // A dropped sender means the multiplexer itself went away.
            CallState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|reply| reply.unwrap_or(Err(Error::ConnectionClosed))),
        }
    }
}
