//! Session event bus: `login-succeeded` and `logout-requested`.
//!
//! Lets the identity holder and the lifecycle manager react to each other
//! without holding references to each other. Delivery is synchronous and
//! in-process. A publish made from inside a handler is queued and delivered
//! after the current event has reached every subscriber, so all subscribers
//! see events in publish order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    LoginSucceeded,
    LogoutRequested { reason: String },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LoginSucceeded => EventKind::LoginSucceeded,
            Self::LogoutRequested { .. } => EventKind::LogoutRequested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoginSucceeded,
    LogoutRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    queue: VecDeque<SessionEvent>,
    dispatching: bool,
}

/// Cloning the bus is cheap; every clone publishes to the same subscribers.
#[derive(Clone, Default)]
pub struct SessionEventBus {
    state: Arc<Mutex<BusState>>,
}

impl std::fmt::Debug for SessionEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionEventBus")
            .field("subscribers", &state.subscribers.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.subscribers.push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        state.subscribers.len() != before
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    pub fn publish(&self, event: SessionEvent) {
        {
            let mut state = self.lock();
            state.queue.push_back(event);
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }

        loop {
            // Handlers run without the lock held so they may publish or subscribe.
            let (event, handlers) = {
                let mut state = self.lock();
                let Some(event) = state.queue.pop_front() else {
                    state.dispatching = false;
                    return;
                };
                let kind = event.kind();
                let handlers: Vec<Handler> = state
                    .subscribers
                    .iter()
                    .filter(|s| s.kind == kind)
                    .map(|s| Arc::clone(&s.handler))
                    .collect();
                (event, handlers)
            };

            tracing::debug!(event = ?event.kind(), subscribers = handlers.len(), "session event");
            for handler in handlers {
                handler(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &SessionEventBus, kind: EventKind) -> Arc<Mutex<Vec<SessionEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(kind, move |event| {
            sink.lock().expect("lock").push(event.clone());
        });
        seen
    }

    #[test]
    fn delivers_only_matching_kind() {
        let bus = SessionEventBus::new();
        let logins = recorder(&bus, EventKind::LoginSucceeded);
        let logouts = recorder(&bus, EventKind::LogoutRequested);

        bus.publish(SessionEvent::LoginSucceeded);
        bus.publish(SessionEvent::LogoutRequested {
            reason: "bye".into(),
        });

        assert_eq!(*logins.lock().expect("lock"), vec![SessionEvent::LoginSucceeded]);
        assert_eq!(
            *logouts.lock().expect("lock"),
            vec![SessionEvent::LogoutRequested {
                reason: "bye".into()
            }]
        );
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = SessionEventBus::new();
        bus.publish(SessionEvent::LoginSucceeded);
        let logins = recorder(&bus, EventKind::LoginSucceeded);
        assert!(logins.lock().expect("lock").is_empty());
    }

    #[test]
    fn nested_publish_keeps_order() {
        let bus = SessionEventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let first = Arc::clone(&order);
        bus.subscribe(EventKind::LoginSucceeded, move |_| {
            first.lock().expect("lock").push("login:a");
            inner_bus.publish(SessionEvent::LogoutRequested {
                reason: "nested".into(),
            });
        });
        let second = Arc::clone(&order);
        bus.subscribe(EventKind::LoginSucceeded, move |_| {
            second.lock().expect("lock").push("login:b");
        });
        let third = Arc::clone(&order);
        bus.subscribe(EventKind::LogoutRequested, move |_| {
            third.lock().expect("lock").push("logout");
        });

        bus.publish(SessionEvent::LoginSucceeded);

        assert_eq!(
            *order.lock().expect("lock"),
            vec!["login:a", "login:b", "logout"]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = SessionEventBus::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let id = bus.subscribe(EventKind::LoginSucceeded, move |_| {
            *counter.lock().expect("lock") += 1;
        });

        bus.publish(SessionEvent::LoginSucceeded);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(SessionEvent::LoginSucceeded);

        assert_eq!(*seen.lock().expect("lock"), 1);
        assert_eq!(bus.subscriber_count(EventKind::LoginSucceeded), 0);
    }
}
