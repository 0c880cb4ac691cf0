//! Broker connection state machine
//!
//! Every connection event of the client goes through
//! [`ConnectionTracker::handle`], which updates the state, does the logging and
//! tells the caller what to do next.
//!
//! ```text
//!              Attempt              Connected
//! Disconnected ───────► Connecting ──────────► Connected
//!      ▲                    │                      │
//!      │    ConnectFailed   │                      │ Disconnected
//!      └────────────────────┴──────────────────────┘
//!                           │
//!                           │ budget spent, fail_on_max_retries
//!                           ▼
//!                         Failed
//! ```
//!
//! The reconnect budget counts failed attempts since the last successful
//! connect. Once it reaches `max_retry_attempts` the tracker either stops the
//! client (`fail_on_max_retries`) or flips to [`RetryBudget::Exhausted`] and
//! keeps retrying without further warnings.

use std::time::Duration;

use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBudget {
    /// Failed attempts since the last successful connect
    Counting(u32),
    /// Budget spent; retries continue but are no longer reported
    Exhausted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The client is about to open a connection
    Attempt,
    Connected,
    ConnectFailed { reason: String },
    /// `clean` means a DISCONNECT packet was exchanged
    Disconnected { clean: bool, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to do, keep polling
    Continue,
    /// Re-issue all topic subscriptions
    Subscribe,
    /// Wait, then let the client reconnect
    RetryAfter(Duration),
    /// Stop the client and report a fatal error
    Stop,
}

#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: ConnectionState,
    budget: RetryBudget,
    has_connected: bool,
    max_retry_attempts: u32,
    fail_on_max_retries: bool,
    reconnect_delay: Duration,
    broker: String,
}

impl ConnectionTracker {
    pub fn new(
        broker: impl Into<String>,
        max_retry_attempts: u32,
        fail_on_max_retries: bool,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            budget: RetryBudget::Counting(0),
            has_connected: false,
            max_retry_attempts,
            fail_on_max_retries,
            reconnect_delay,
            broker: broker.into(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Failed attempts since the last connect, `None` once the budget is spent
    pub fn reconnect_attempts(&self) -> Option<u32> {
        match self.budget {
            RetryBudget::Counting(n) => Some(n),
            RetryBudget::Exhausted => None,
        }
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Directive {
        if self.state == ConnectionState::Failed {
            debug!("Ignoring {:?}, connection to {} has failed", event, self.broker);
            return Directive::Stop;
        }

        match event {
            ConnectionEvent::Attempt => {
                if self.state == ConnectionState::Disconnected {
                    debug!("Connecting to MQTT broker at {}", self.broker);
                    self.state = ConnectionState::Connecting;
                }
                Directive::Continue
            }
            ConnectionEvent::Connected => {
                info!("Successfully connected to MQTT broker at {}", self.broker);
                self.state = ConnectionState::Connected;
                self.budget = RetryBudget::Counting(0);
                self.has_connected = true;
                Directive::Subscribe
            }
            ConnectionEvent::ConnectFailed { reason } => self.on_connect_failed(reason),
            ConnectionEvent::Disconnected { clean, reason } => {
                let was_connected = self.state == ConnectionState::Connected;
                self.state = ConnectionState::Disconnected;

                if !self.has_connected {
                    // never got a session, nothing regressed
                    debug!("Disconnected from {} before first connect: {}", self.broker, reason);
                } else if clean && was_connected {
                    info!("Disconnected from MQTT broker at {}", self.broker);
                } else {
                    warn!("Lost connection to MQTT broker at {}: {}", self.broker, reason);
                }
                Directive::RetryAfter(self.reconnect_delay)
            }
        }
    }

    fn on_connect_failed(&mut self, reason: String) -> Directive {
        self.state = ConnectionState::Disconnected;

        let attempts = match self.budget {
            RetryBudget::Exhausted => {
                debug!("Reconnect to {} failed: {}", self.broker, reason);
                return Directive::RetryAfter(self.reconnect_delay);
            }
            RetryBudget::Counting(n) => n.saturating_add(1),
        };

        if attempts < self.max_retry_attempts {
            self.budget = RetryBudget::Counting(attempts);
            warn!(
                "Failed to connect to MQTT broker at {} (attempt {}/{}): {}. Retrying in {}s",
                self.broker,
                attempts,
                self.max_retry_attempts,
                reason,
                self.reconnect_delay.as_secs()
            );
            return Directive::RetryAfter(self.reconnect_delay);
        }

        if self.fail_on_max_retries {
            error!(
                "Failed to connect to MQTT broker at {} after {} attempts: {}. Stopping client",
                self.broker, attempts, reason
            );
            self.budget = RetryBudget::Counting(attempts);
            self.state = ConnectionState::Failed;
            Directive::Stop
        } else {
            error!(
                "Failed to connect to MQTT broker at {} after {} attempts: {}. Retrying silently",
                self.broker, attempts, reason
            );
            self.budget = RetryBudget::Exhausted;
            Directive::RetryAfter(self.reconnect_delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(5);

    fn failed() -> ConnectionEvent {
        ConnectionEvent::ConnectFailed {
            reason: "connection refused".to_string(),
        }
    }

    #[test]
    fn connect_subscribes_and_resets_counter() {
        let mut tracker = ConnectionTracker::new("broker:1883", 10, false, DELAY);

        tracker.handle(ConnectionEvent::Attempt);
        assert_eq!(tracker.state(), ConnectionState::Connecting);

        for _ in 0..4 {
            assert_eq!(tracker.handle(failed()), Directive::RetryAfter(DELAY));
        }
        assert_eq!(tracker.reconnect_attempts(), Some(4));

        assert_eq!(tracker.handle(ConnectionEvent::Connected), Directive::Subscribe);
        assert_eq!(tracker.state(), ConnectionState::Connected);
        assert_eq!(tracker.reconnect_attempts(), Some(0));
    }

    #[test]
    fn exhausted_budget_fails_hard_when_configured() {
        let mut tracker = ConnectionTracker::new("broker:1883", 3, true, DELAY);

        assert_eq!(tracker.handle(failed()), Directive::RetryAfter(DELAY));
        assert_eq!(tracker.handle(failed()), Directive::RetryAfter(DELAY));
        assert_eq!(tracker.handle(failed()), Directive::Stop);
        assert_eq!(tracker.state(), ConnectionState::Failed);

        // terminal
        assert_eq!(tracker.handle(ConnectionEvent::Connected), Directive::Stop);
    }

    #[test]
    fn exhausted_budget_retries_silently_otherwise() {
        let mut tracker = ConnectionTracker::new("broker:1883", 2, false, DELAY);

        tracker.handle(failed());
        tracker.handle(failed());
        assert_eq!(tracker.budget(), RetryBudget::Exhausted);
        assert_eq!(tracker.reconnect_attempts(), None);

        for _ in 0..10 {
            assert_eq!(tracker.handle(failed()), Directive::RetryAfter(DELAY));
        }
        assert_eq!(tracker.budget(), RetryBudget::Exhausted);
        assert_eq!(tracker.state(), ConnectionState::Disconnected);

        tracker.handle(ConnectionEvent::Connected);
        assert_eq!(tracker.reconnect_attempts(), Some(0));
    }

    #[test]
    fn disconnect_after_connect_schedules_reconnect() {
        let mut tracker = ConnectionTracker::new("broker:1883", 3, true, DELAY);
        tracker.handle(ConnectionEvent::Connected);

        let directive = tracker.handle(ConnectionEvent::Disconnected {
            clean: false,
            reason: "keep alive timeout".to_string(),
        });
        assert_eq!(directive, Directive::RetryAfter(DELAY));
        assert_eq!(tracker.state(), ConnectionState::Disconnected);

        tracker.handle(ConnectionEvent::Attempt);
        assert_eq!(tracker.state(), ConnectionState::Connecting);
    }

    #[test]
    fn zero_budget_gives_up_on_first_failure() {
        let mut tracker = ConnectionTracker::new("broker:1883", 0, true, DELAY);
        assert_eq!(tracker.handle(failed()), Directive::Stop);
    }
}
