//! Telemetry routing and mission dispatch for a fleet of inspection robots.
//!
//! ```text
//! broker ─► mqtt::TelemetryIngestor ─► mqtt::TopicRouter ─► events::EventHub ─► fleet::FleetWorker
//!                                                                                    │
//!              scheduling::AutoScheduler ─► fleet::MissionQueue ─► scheduling::can_start
//! ```

pub mod config;
pub mod events;
pub mod fleet;
pub mod logging;
pub mod mqtt;
pub mod scheduling;
