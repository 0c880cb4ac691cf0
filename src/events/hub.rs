//! In-process publish/subscribe hub
//!
//! Handlers are registered on an [`EventHubBuilder`] during startup. Calling
//! [`EventHubBuilder::build`] freezes the table into an [`EventHub`], which only
//! hands out `&self` access, so no lock guards the registrations while
//! messages are flowing.
//!
//! ```text
//! consumer A ─┐                         ┌─► handler A1
//! consumer B ─┼─► EventHubBuilder ─► EventHub::publish(kind) ─► handler A2
//!             │     (subscribe)         └─► handler B1
//! ```
//!
//! Delivery is synchronous, on the publishing thread, in registration order.
//! A slow handler delays the ones after it; consumers with real work should
//! hand the message to their own task and return.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::mqtt::messages::{MessageKind, TelemetryMessage, TelemetryPayload};

type Handler = Arc<dyn Fn(&TelemetryMessage) + Send + Sync>;

/// Handle returned by `subscribe`, usable to remove the handler again before
/// the hub is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventHubBuilder {
    handlers: HashMap<MessageKind, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl EventHubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one payload type.
    pub fn subscribe<T, F>(&mut self, handler: F) -> SubscriptionId
    where
        T: TelemetryPayload,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_kind(T::KIND, move |message| {
            if let Some(payload) = T::extract(message) {
                handler(payload);
            }
        })
    }

    /// Registers a handler that receives the whole message for `kind`.
    pub fn subscribe_kind<F>(&mut self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: Fn(&TelemetryMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("Registered handler {:?} for {}", id, kind);
        id
    }

    /// Removes a handler. Returns false if the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(handler_id, _)| *handler_id == id) {
                handlers.remove(pos);
                debug!("Removed handler {:?}", id);
                return true;
            }
        }
        false
    }

    pub fn build(self) -> EventHub {
        let handlers = self
            .handlers
            .into_iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(kind, handlers)| (kind, handlers.into_iter().map(|(_, h)| h).collect()))
            .collect();

        EventHub { handlers }
    }
}

/// Frozen handler table
pub struct EventHub {
    handlers: HashMap<MessageKind, Vec<Handler>>,
}

impl EventHub {
    /// Delivers `message` to every handler of its kind.
    ///
    /// `None` and kinds without handlers are silently ignored. The hub keeps no
    /// history; a message published before a handler existed is never replayed.
    pub fn publish<'a>(&self, message: impl Into<Option<&'a TelemetryMessage>>) {
        let Some(message) = message.into() else {
            return;
        };

        let kind = message.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            trace!("No handlers for {}", kind);
            return;
        };

        trace!("Publishing {} to {} handlers", kind, handlers.len());
        for handler in handlers {
            handler(message);
        }
    }

    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&MessageKind, usize> =
            self.handlers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("EventHub").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::messages::{IsarBatteryMessage, IsarStartupMessage};
    use chrono::Utc;
    use std::sync::Mutex;

    fn battery(level: f32) -> TelemetryMessage {
        TelemetryMessage::from(IsarBatteryMessage {
            robot_name: "Nova".to_string(),
            isar_id: "isar-nova".to_string(),
            battery_level: level,
            battery_state: None,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut builder = EventHubBuilder::new();

        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            builder.subscribe::<IsarBatteryMessage, _>(move |msg| {
                seen.lock().unwrap().push((label, msg.battery_level));
            });
        }

        let hub = builder.build();
        hub.publish(&battery(42.0));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 42.0), ("second", 42.0), ("third", 42.0)]
        );
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let hub = EventHubBuilder::new().build();
        hub.publish(&battery(10.0));
        assert_eq!(hub.handler_count(MessageKind::IsarBattery), 0);
    }

    #[test]
    fn publish_none_is_a_no_op() {
        let calls = Arc::new(Mutex::new(0));
        let mut builder = EventHubBuilder::new();
        let counter = calls.clone();
        builder.subscribe_kind(MessageKind::IsarBattery, move |_| {
            *counter.lock().unwrap() += 1;
        });

        let hub = builder.build();
        hub.publish(None);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn only_handlers_of_the_message_kind_are_called() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut builder = EventHubBuilder::new();

        let startup_calls = calls.clone();
        builder.subscribe::<IsarStartupMessage, _>(move |_| {
            startup_calls.lock().unwrap().push("startup");
        });
        let battery_calls = calls.clone();
        builder.subscribe::<IsarBatteryMessage, _>(move |_| {
            battery_calls.lock().unwrap().push("battery");
        });

        builder.build().publish(&battery(5.0));
        assert_eq!(*calls.lock().unwrap(), vec!["battery"]);
    }

    #[test]
    fn unsubscribed_handler_is_not_called() {
        let calls = Arc::new(Mutex::new(0));
        let mut builder = EventHubBuilder::new();
        let counter = calls.clone();
        let id = builder.subscribe::<IsarBatteryMessage, _>(move |_| {
            *counter.lock().unwrap() += 1;
        });

        assert!(builder.unsubscribe(id));
        assert!(!builder.unsubscribe(id));

        let hub = builder.build();
        hub.publish(&battery(1.0));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn publish_is_safe_from_many_threads() {
        let calls = Arc::new(Mutex::new(0usize));
        let mut builder = EventHubBuilder::new();
        let counter = calls.clone();
        builder.subscribe::<IsarBatteryMessage, _>(move |_| {
            *counter.lock().unwrap() += 1;
        });
        let hub = Arc::new(builder.build());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        hub.publish(&battery(i as f32));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(*calls.lock().unwrap(), 800);
    }
}
