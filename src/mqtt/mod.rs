//! # MQTT telemetry ingestion
//!
//! Connects to the fleet's MQTT broker, classifies every inbound message by its
//! topic and publishes the decoded payload on the [`EventHub`](crate::events::EventHub).
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker connection settings
//! ├── connection.rs       - Connection state machine and reconnect budget
//! ├── error.rs            - Topic, dispatch and ingestor errors
//! ├── message_manager.rs  - Raw message type and the classify/publish pipeline
//! ├── messages.rs         - Message kinds and their payload schemas
//! ├── mqtt_handler.rs     - Typestate ingestor driving the rumqttc event loop
//! └── topics.rs           - Topic filters, the static topic table and the router
//! ```
//!
//! The router and the hub are shared through `Arc` and never mutated after
//! startup. Broker traffic and locally injected messages take the same path
//! through [`TelemetryDispatcher`], so the pipeline can be exercised without a
//! broker.

pub mod config;
pub mod connection;
pub mod error;
pub mod message_manager;
pub mod messages;
pub mod mqtt_handler;
pub mod topics;

pub use config::MqttConfig;
pub use connection::{ConnectionState, ConnectionTracker};
pub use error::{DispatchError, IngestorError, TopicError};
pub use message_manager::{DispatchOutcome, InboundMessage, TelemetryDispatcher};
pub use messages::{MessageKind, TelemetryMessage, TelemetryPayload};
pub use mqtt_handler::{MqttStatus, TelemetryIngestor};
pub use topics::{TopicFilter, TopicRouter, TOPIC_TABLE};
