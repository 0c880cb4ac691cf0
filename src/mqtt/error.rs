use thiserror::Error;

use super::messages::MessageKind;

/// Errors of the topic router
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// Topic or filter that a broker would not accept
    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// A concrete topic matched more than one registered pattern
    #[error("Topic '{topic}' matches more than one registered pattern: {patterns:?}")]
    ConflictingPatterns { topic: String, patterns: Vec<String> },

    /// Two registered patterns accept a common topic
    #[error("Registered patterns '{first}' and '{second}' overlap")]
    OverlappingPatterns { first: String, second: String },
}

/// Errors of the classify and publish pipeline
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Routing error: {0}")]
    Routing(#[from] TopicError),

    #[error("Failed to decode {kind} payload on topic '{topic}': {source}")]
    Decode {
        topic: String,
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by the telemetry ingestor to its host
#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Topic configuration error: {0}")]
    Topic(#[from] TopicError),

    /// Reconnect budget spent while configured to fail hard
    #[error("Gave up connecting to {host}:{port} after {attempts} attempts")]
    RetriesExhausted {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}
