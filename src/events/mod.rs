//! Event distribution between telemetry ingestion and its consumers
//!
//! ```text
//! events/
//! └── hub.rs  - Handler registry and synchronous fan-out
//! ```

pub mod hub;

pub use hub::{EventHub, EventHubBuilder, SubscriptionId};
