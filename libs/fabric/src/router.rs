//! Inbound frame classification
//!
//! A frame whose `id` names a pending call is a reply and settles that call.
//! Anything else, including a reply for a call that already settled, is a
//! push event and goes to the dispatcher under its `event` name.

use flowlink_core::InboundEnvelope;
use tracing::debug;

use crate::codec::{Codec, JsonCodec};
use crate::dispatcher::EventDispatcher;
use crate::multiplexer::RequestMultiplexer;

/// What became of one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Reply,
    Event,
    /// Not a valid envelope
    Dropped,
}

pub struct Router<C = JsonCodec> {
    codec: C,
    multiplexer: RequestMultiplexer<C>,
    dispatcher: EventDispatcher,
}

impl<C: Codec + Clone> Router<C> {
    pub fn new(codec: C, multiplexer: RequestMultiplexer<C>, dispatcher: EventDispatcher) -> Self {
        Self {
            codec,
            multiplexer,
            dispatcher,
        }
    }

    pub fn route(&self, frame: &[u8]) -> Routed {
        let envelope: InboundEnvelope = match self.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, len = frame.len(), "dropping malformed frame");
                return Routed::Dropped;
            }
        };

        let Some(envelope) = self.multiplexer.resolve(envelope) else {
            return Routed::Reply;
        };

        if let Some(id) = envelope.id.as_deref() {
            debug!(id, event = %envelope.event, "reply for no pending call, treating as event");
        }
        let event = envelope.event.clone();
        let payload = envelope.into_payload();
        self.dispatcher.dispatch(&event, &payload);
        Routed::Event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::connection::ConnectionManager;
    use crate::transport::memory;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn router() -> (Router, EventDispatcher) {
        let (connector, _listener) = memory::channel();
        let connection = ConnectionManager::new(connector, ReconnectConfig::default());
        let multiplexer = RequestMultiplexer::new(connection, Duration::from_secs(1));
        let dispatcher = EventDispatcher::new();
        (Router::new(JsonCodec, multiplexer, dispatcher.clone()), dispatcher)
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (router, _) = router();
        assert_eq!(router.route(b"not json"), Routed::Dropped);
        assert_eq!(router.route(br#"{"id":"1","payload":{}}"#), Routed::Dropped);
    }

    #[test]
    fn unknown_ids_and_pushes_become_events() {
        let (router, dispatcher) = router();
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let sink = Arc::clone(&seen);
        dispatcher.subscribe("route.list", move |p| sink.lock().push(p.clone()));

        assert_eq!(
            router.route(br#"{"id":"gone","event":"route.list","payload":{"routes":[]}}"#),
            Routed::Event
        );
        assert_eq!(router.route(br#"{"event":"route.list"}"#), Routed::Event);
        assert_eq!(*seen.lock(), [json!({"routes": []}), Value::Null]);
    }
}
