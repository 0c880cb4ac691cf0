//! Classify and publish
//!
//! [`TelemetryDispatcher`] is the one path every telemetry message takes into
//! the event hub, whether it arrived from the broker or was injected locally:
//!
//! ```text
//! topic, payload ─► TopicRouter::resolve ─► TelemetryMessage::decode ─► EventHub::publish
//!                        │ none / conflict          │ malformed
//!                        ▼                          ▼
//!                     dropped                    dropped
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, error, warn};

use super::error::DispatchError;
use super::messages::{MessageKind, TelemetryMessage};
use super::topics::TopicRouter;
use crate::events::EventHub;

const PREVIEW_LEN: usize = 40;

/// Raw message as received on a topic
#[derive(Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = self.payload_str();
        let preview: String = content.chars().take(PREVIEW_LEN).collect();
        let ellipsis = if content.chars().count() > PREVIEW_LEN {
            "..."
        } else {
            ""
        };
        write!(
            f,
            "{} {}: {}{}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            preview,
            ellipsis
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published(MessageKind),
    /// No pattern covers the topic
    Unmapped,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    received: AtomicUsize,
    published: AtomicUsize,
    dropped: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: usize,
    pub published: usize,
    pub dropped: usize,
}

/// Routes raw messages through the topic router into the event hub.
///
/// Cheap to clone; clones share counters.
#[derive(Debug, Clone)]
pub struct TelemetryDispatcher {
    router: Arc<TopicRouter>,
    hub: Arc<EventHub>,
    counters: Arc<DispatchCounters>,
}

impl TelemetryDispatcher {
    pub fn new(router: Arc<TopicRouter>, hub: Arc<EventHub>) -> Self {
        Self {
            router,
            hub,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Classifies, decodes and publishes one message.
    ///
    /// Unmapped topics and undecodable payloads are logged and dropped; the
    /// error is returned for callers that want it but nothing reaches the hub.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<DispatchOutcome, DispatchError> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let kind = match self.router.resolve(topic) {
            Ok(Some(kind)) => kind,
            Ok(None) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic, "No message type registered for topic, dropping message");
                return Ok(DispatchOutcome::Unmapped);
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(topic, "Could not route message: {}", e);
                return Err(e.into());
            }
        };

        let message = match TelemetryMessage::decode(kind, payload) {
            Ok(message) => message,
            Err(source) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic, %kind, "Could not decode payload: {}", source);
                return Err(DispatchError::Decode {
                    topic: topic.to_string(),
                    kind,
                    source,
                });
            }
        };

        debug!(topic, %kind, "Publishing telemetry message");
        self.hub.publish(&message);
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        Ok(DispatchOutcome::Published(kind))
    }

    /// Loopback entry: re-delivers a raw message through the same pipeline.
    pub fn dispatch_message(
        &self,
        message: &InboundMessage,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch(&message.topic, &message.payload)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            received: self.counters.received.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}
