//! # Fleet state
//!
//! Keeps the robots' availability current from telemetry and starts queued
//! missions once admission control lets them through.
//!
//! ```text
//! EventHub handlers ──try_send──► FleetWorker ──► RobotRegistry
//!                                      │
//!                                      └─► MissionQueue::try_dispatch ──► DispatchedMission (mpsc)
//! ```
//!
//! Hub handlers run on the ingestor's task, so they only forward a
//! [`FleetAction`] into the worker's channel and return.

pub mod mission_queue;
pub mod registry;
pub mod worker;

pub use mission_queue::{DispatchAttempt, DispatchedMission, MissionDefinition, MissionQueue};
pub use registry::{Liveness, RobotDirectory, RobotRegistry};
pub use worker::{FleetAction, FleetConfig, FleetHandle, FleetWorker};
