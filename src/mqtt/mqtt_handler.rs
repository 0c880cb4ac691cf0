use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use statum::{machine, state};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::connection::{ConnectionEvent, ConnectionState, ConnectionTracker, Directive};
use super::error::IngestorError;
use super::message_manager::TelemetryDispatcher;
use super::topics::{TopicFilter, TopicRouter};
use crate::events::EventHub;

const REQUEST_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    /// `None` once the retry budget is spent
    pub reconnect_attempts: Option<u32>,
    pub messages_received: usize,
    pub messages_published: usize,
    pub messages_dropped: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

#[state]
#[derive(Debug, Clone)]
pub enum IngestorState {
    Configured, // Built from config, nothing checked yet
    Validated,  // Router and subscriptions checked, ready to run
}

/// Broker-facing side of the telemetry pipeline
///
/// Only a [`Validated`] ingestor can run, so topic configuration errors surface
/// before any connection is made.
#[machine]
pub struct TelemetryIngestor<S: IngestorState> {
    config: MqttConfig,
    dispatcher: TelemetryDispatcher,
    status_tx: watch::Sender<MqttStatus>,
}

impl<S: IngestorState> TelemetryIngestor<S> {
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Handle for injecting messages without a broker
    pub fn dispatcher(&self) -> TelemetryDispatcher {
        self.dispatcher.clone()
    }

    pub fn status(&self) -> watch::Receiver<MqttStatus> {
        self.status_tx.subscribe()
    }
}

impl TelemetryIngestor<Configured> {
    pub fn create(config: MqttConfig, router: Arc<TopicRouter>, hub: Arc<EventHub>) -> Self {
        debug!("Creating telemetry ingestor with {:?}", config);
        let (status_tx, _) = watch::channel(MqttStatus::default());

        Self::new(config, TelemetryDispatcher::new(router, hub), status_tx)
    }

    pub fn validate(self) -> Result<TelemetryIngestor<Validated>, IngestorError> {
        if self.config.host.trim().is_empty() {
            return Err(IngestorError::Configuration(
                "broker host must not be empty".to_string(),
            ));
        }
        if self.config.client_id.trim().is_empty() {
            return Err(IngestorError::Configuration(
                "client id must not be empty".to_string(),
            ));
        }
        if self.config.topics.is_empty() {
            return Err(IngestorError::Configuration(
                "no topics to subscribe to".to_string(),
            ));
        }

        self.dispatcher.router().validate()?;
        for topic in &self.config.topics {
            TopicFilter::parse(topic)?;
        }

        info!(
            "Telemetry ingestor validated: {} routes, subscribing to {:?}",
            self.dispatcher.router().routes().count(),
            self.config.topics
        );
        Ok(self.transition())
    }
}

impl TelemetryIngestor<Validated> {
    /// Connects and pumps broker messages into the event hub until `cancel`
    /// fires.
    ///
    /// Returns an error only when the reconnect budget is spent and the config
    /// asks to fail hard. On cancellation the client disconnects and waits at
    /// most `grace` for the DISCONNECT to go out.
    pub async fn run(self, cancel: CancellationToken, grace: Duration) -> Result<(), IngestorError> {
        let (client, mut eventloop) =
            AsyncClient::new(self.config.to_options(), REQUEST_CHANNEL_CAPACITY);
        let mut tracker = ConnectionTracker::new(
            format!("{}:{}", self.config.host, self.config.port),
            self.config.max_retry_attempts,
            self.config.fail_on_max_retries,
            self.config.reconnect_delay(),
        );

        info!(
            "Starting telemetry ingestor for {}:{}",
            self.config.host, self.config.port
        );

        loop {
            if tracker.state() == ConnectionState::Disconnected {
                tracker.handle(ConnectionEvent::Attempt);
                self.update_status(&tracker);
            }

            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            let directive = match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => tracker.handle(ConnectionEvent::Connected),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // errors are logged and counted by the dispatcher
                    let _ = self.dispatcher.dispatch(&publish.topic, &publish.payload);
                    self.status_tx
                        .send_modify(|status| status.last_activity = Some(Local::now()));
                    Directive::Continue
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracker.handle(ConnectionEvent::Disconnected {
                        clean: true,
                        reason: "broker sent DISCONNECT".to_string(),
                    })
                }
                Ok(_) => Directive::Continue,
                Err(e) if tracker.state() == ConnectionState::Connected => {
                    tracker.handle(ConnectionEvent::Disconnected {
                        clean: false,
                        reason: e.to_string(),
                    })
                }
                Err(e) => tracker.handle(ConnectionEvent::ConnectFailed {
                    reason: e.to_string(),
                }),
            };
            self.update_status(&tracker);

            match directive {
                Directive::Continue => {}
                Directive::Subscribe => self.subscribe_all(&client),
                Directive::RetryAfter(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Directive::Stop => {
                    if let Err(e) = client.try_disconnect() {
                        debug!("Could not queue disconnect: {}", e);
                    }
                    return Err(IngestorError::RetriesExhausted {
                        host: self.config.host.clone(),
                        port: self.config.port,
                        attempts: tracker
                            .reconnect_attempts()
                            .unwrap_or(self.config.max_retry_attempts),
                    });
                }
            }
        }

        let result = self.shutdown(&client, &mut eventloop, &tracker, grace).await;
        self.status_tx
            .send_modify(|status| status.connection_state = ConnectionState::Disconnected);
        info!("Telemetry ingestor stopped");
        result
    }

    fn subscribe_all(&self, client: &AsyncClient) {
        for topic in &self.config.topics {
            match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                Ok(()) => debug!(topic = %topic, "Subscribed"),
                Err(e) => error!(topic = %topic, "Failed to subscribe: {}", e),
            }
        }
    }

    fn update_status(&self, tracker: &ConnectionTracker) {
        let stats = self.dispatcher.stats();
        self.status_tx.send_modify(|status| {
            status.connection_state = tracker.state();
            status.reconnect_attempts = tracker.reconnect_attempts();
            status.messages_received = stats.received;
            status.messages_published = stats.published;
            status.messages_dropped = stats.dropped;
        });
    }

    async fn shutdown(
        &self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
        tracker: &ConnectionTracker,
        grace: Duration,
    ) -> Result<(), IngestorError> {
        if tracker.state() != ConnectionState::Connected {
            debug!("Not connected, nothing to disconnect");
            return Ok(());
        }

        info!("Disconnecting from MQTT broker");

        // queueing the disconnect can block on a full request channel
        let drained = tokio::time::timeout(grace, async {
            client.disconnect().await?;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Connection closed during shutdown: {}", e);
                        break;
                    }
                }
            }
            Ok::<(), IngestorError>(())
        })
        .await;

        match drained {
            Ok(result) => result,
            Err(_) => {
                warn!("Disconnect not sent within {:?}, dropping connection", grace);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHubBuilder;
    use crate::mqtt::error::TopicError;
    use crate::mqtt::messages::MessageKind;

    fn ingestor(config: MqttConfig) -> TelemetryIngestor<Configured> {
        TelemetryIngestor::create(
            config,
            Arc::new(TopicRouter::with_default_table().unwrap()),
            Arc::new(EventHubBuilder::new().build()),
        )
    }

    fn unreachable_broker() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            reconnect_delay_secs: 0,
            max_retry_attempts: 2,
            fail_on_max_retries: true,
            ..Default::default()
        }
    }

    #[test]
    fn validation_accepts_default_config() {
        assert!(ingestor(MqttConfig::default()).validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_subscriptions() {
        let no_topics = MqttConfig {
            topics: vec![],
            ..Default::default()
        };
        assert!(matches!(
            ingestor(no_topics).validate(),
            Err(IngestorError::Configuration(_))
        ));

        let bad_filter = MqttConfig {
            topics: vec!["isar/#/status".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            ingestor(bad_filter).validate(),
            Err(IngestorError::Topic(TopicError::InvalidFilter { .. }))
        ));
    }

    #[test]
    fn validation_rejects_overlapping_routes() {
        let router = TopicRouter::from_table(&[
            ("many/#", MessageKind::IsarStatus),
            ("many/specific", MessageKind::IsarBattery),
        ])
        .unwrap();
        let ingestor = TelemetryIngestor::create(
            MqttConfig::default(),
            Arc::new(router),
            Arc::new(EventHubBuilder::new().build()),
        );

        assert!(matches!(
            ingestor.validate(),
            Err(IngestorError::Topic(TopicError::OverlappingPatterns { .. }))
        ));
    }

    #[tokio::test]
    async fn gives_up_after_budget_when_failing_hard() {
        let ingestor = ingestor(unreachable_broker()).validate().unwrap();
        let status = ingestor.status();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            ingestor.run(CancellationToken::new(), Duration::from_secs(1)),
        )
        .await
        .expect("ingestor did not give up");

        assert!(matches!(
            result,
            Err(IngestorError::RetriesExhausted { attempts: 2, port: 1, .. })
        ));
        assert_eq!(status.borrow().connection_state, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn stops_on_cancellation() {
        let config = MqttConfig {
            fail_on_max_retries: false,
            ..unreachable_broker()
        };
        let ingestor = ingestor(config).validate().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ingestor.run(cancel, Duration::from_secs(1)),
        )
        .await
        .expect("ingestor ignored cancellation");
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stays_within_grace_when_request_queue_is_full() {
        let ingestor = ingestor(MqttConfig::default()).validate().unwrap();
        let (client, mut eventloop) = AsyncClient::new(MqttConfig::default().to_options(), 1);
        client.try_subscribe("isar/#", QoS::AtLeastOnce).unwrap();

        let mut tracker =
            ConnectionTracker::new("localhost:1883", 3, false, Duration::from_secs(1));
        tracker.handle(ConnectionEvent::Attempt);
        tracker.handle(ConnectionEvent::Connected);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ingestor.shutdown(&client, &mut eventloop, &tracker, Duration::from_millis(200)),
        )
        .await
        .expect("disconnect outlived the grace period");
        assert!(result.is_ok());
    }
}
