//! Mission admission control
//!
//! Decides whether a mission run may start on a robot right now. The checks run
//! in a fixed order and the first failing one is reported:
//!
//! 1. frozen queue, unless the run is a priority run
//! 2. robot status is not `Available`
//! 3. on-board controller link is down
//! 4. robot is deprecated
//!
//! Skipping the frozen queue is the only privilege of priority runs. The other
//! gates hold for every mission type, emergencies included.

use std::fmt;

use tracing::debug;

use super::models::{MissionRun, Robot, RobotStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    QueueFrozen,
    RobotNotAvailable,
    ControllerDisconnected,
    RobotDeprecated,
}

impl RejectReason {
    /// Stable code for logs and reports
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::QueueFrozen => "queue_frozen",
            RejectReason::RobotNotAvailable => "robot_not_available",
            RejectReason::ControllerDisconnected => "controller_disconnected",
            RejectReason::RobotDeprecated => "robot_deprecated",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            RejectReason::QueueFrozen => "mission queue is frozen",
            RejectReason::RobotNotAvailable => "robot is not available",
            RejectReason::ControllerDisconnected => "robot controller is disconnected",
            RejectReason::RobotDeprecated => "robot is deprecated",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept,
    Reject(RejectReason),
}

impl AdmissionDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdmissionDecision::Accept)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            AdmissionDecision::Accept => None,
            AdmissionDecision::Reject(reason) => Some(*reason),
        }
    }
}

pub fn can_start(robot: &Robot, mission_run: &MissionRun) -> AdmissionDecision {
    let decision = if robot.mission_queue_frozen && !mission_run.is_priority() {
        AdmissionDecision::Reject(RejectReason::QueueFrozen)
    } else if robot.status != RobotStatus::Available {
        AdmissionDecision::Reject(RejectReason::RobotNotAvailable)
    } else if !robot.isar_connected {
        AdmissionDecision::Reject(RejectReason::ControllerDisconnected)
    } else if robot.deprecated {
        AdmissionDecision::Reject(RejectReason::RobotDeprecated)
    } else {
        AdmissionDecision::Accept
    };

    debug!(
        robot_id = %robot.id,
        mission_run_id = %mission_run.id,
        ?decision,
        "Admission decision"
    );
    decision
}
