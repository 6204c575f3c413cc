//! Push event fan-out
//!
//! Listeners are keyed by event name and run synchronously, in registration
//! order. Each dispatch works on a snapshot of the listeners taken when it
//! starts: a listener removed mid-dispatch still receives that dispatch, and
//! one added mid-dispatch first hears the next one.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

/// Callback receiving an event payload
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Listener)>>,
}

/// Event dispatcher. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event`.
    ///
    /// The registration lasts until [`Subscription::unsubscribe`] is called;
    /// dropping the handle does not remove it.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let event = event.into();
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .topics
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event,
            id,
        }
    }

    /// Invoke every listener registered for `event` with `payload`.
    pub fn dispatch(&self, event: &str, payload: &Value) {
        let snapshot: Vec<Listener> = {
            let registry = self.registry.lock();
            match registry.topics.get(event) {
                Some(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };

        trace!(event, listeners = snapshot.len(), "dispatching event");
        for listener in snapshot {
            listener(payload);
        }
    }

    /// Number of listeners currently registered for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.registry
            .lock()
            .topics
            .get(event)
            .map_or(0, Vec::len)
    }
}

/// Handle that removes exactly one registration
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the registration. Repeated calls are no-ops.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock();
        if let Some(listeners) = registry.topics.get_mut(&self.event) {
            listeners.retain(|(id, _)| *id != self.id);
            if listeners.is_empty() {
                registry.topics.remove(&self.event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &'static str| -> Listener {
                let log = Arc::clone(&log);
                Arc::new(move |payload: &Value| log.lock().push(format!("{}:{}", tag, payload)))
            }
        };
        (log, make)
    }

    #[test]
    fn dispatch_without_listeners_is_noop() {
        let dispatcher = EventDispatcher::new();
        dispatcher.dispatch("flow.complete", &Value::Null);
        assert_eq!(dispatcher.listener_count("flow.complete"), 0);
    }

    #[test]
    fn listeners_run_once_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        let first = make("first");
        let second = make("second");
        dispatcher.subscribe("node.start", move |p| first(p));
        dispatcher.subscribe("node.start", move |p| second(p));

        dispatcher.dispatch("node.start", &json!(1));

        assert_eq!(*log.lock(), ["first:1", "second:1"]);
    }

    #[test]
    fn events_are_isolated_by_name() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        let listener = make("a");
        dispatcher.subscribe("flow.started", move |p| listener(p));

        dispatcher.dispatch("flow.error", &json!("x"));

        assert!(log.lock().is_empty());
    }

    #[test]
    fn unsubscribe_removes_only_its_registration() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        let sub_a = dispatcher.subscribe("e", move |p| a(p));
        dispatcher.subscribe("e", move |p| b(p));

        sub_a.unsubscribe();
        sub_a.unsubscribe();
        dispatcher.dispatch("e", &json!(2));

        assert_eq!(*log.lock(), ["b:2"]);
        assert_eq!(dispatcher.listener_count("e"), 1);
    }

    #[test]
    fn unsubscribe_during_dispatch_keeps_snapshot() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        let second_sub: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let remover = {
            let second_sub = Arc::clone(&second_sub);
            let record = make("first");
            move |p: &Value| {
                record(p);
                if let Some(sub) = second_sub.lock().as_ref() {
                    sub.unsubscribe();
                }
            }
        };
        dispatcher.subscribe("e", remover);
        let second = make("second");
        *second_sub.lock() = Some(dispatcher.subscribe("e", move |p| second(p)));

        dispatcher.dispatch("e", &json!(1));
        dispatcher.dispatch("e", &json!(2));

        assert_eq!(*log.lock(), ["first:1", "second:1", "first:2"]);
    }

    #[test]
    fn subscription_outliving_dispatcher_is_harmless() {
        let dispatcher = EventDispatcher::new();
        let sub = dispatcher.subscribe("e", |_| {});
        drop(dispatcher);
        sub.unsubscribe();
    }
}
