use thiserror::Error;

use super::admission::RejectReason;

/// Failures of the mission-enqueue collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("Unknown mission definition: {0}")]
    UnknownMissionDefinition(String),

    #[error("Unknown robot: {0}")]
    UnknownRobot(String),

    #[error("Robot {robot_id} belongs to installation {actual}, not {expected}")]
    InstallationMismatch {
        robot_id: String,
        expected: String,
        actual: String,
    },

    #[error("Mission rejected: {0}")]
    Rejected(RejectReason),

    #[error("Mission queue unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the schedule store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Schedule store unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown schedule job: {0}")]
    UnknownJob(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid scheduler settings: {0}")]
    InvalidSettings(String),
}
