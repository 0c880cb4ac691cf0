//! Per-robot mission queues
//!
//! Runs wait here until [`can_start`] admits the head of a robot's queue. An
//! admitted run is popped, the robot is marked busy and the run is handed to
//! the robot controller client through an mpsc channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::registry::{RobotDirectory, RobotRegistry};
use crate::scheduling::admission::{can_start, AdmissionDecision, RejectReason};
use crate::scheduling::auto_scheduler::{EnqueueDisposition, EnqueueReceipt, MissionEnqueuer};
use crate::scheduling::error::EnqueueError;
use crate::scheduling::models::{MissionRun, MissionRunType, Robot, RobotStatus};

/// Mission template that scheduled runs are created from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionDefinition {
    pub id: String,
    pub name: String,
    pub installation_code: String,
    #[serde(default)]
    pub mission_type: MissionRunType,
}

/// A run handed over for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedMission {
    pub mission_run: MissionRun,
    pub robot: Robot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchAttempt {
    Dispatched(MissionRun),
    /// Head of the queue is not admitted yet
    Waiting(RejectReason),
    Empty,
}

pub struct MissionQueue {
    definitions: HashMap<String, MissionDefinition>,
    registry: Arc<RobotRegistry>,
    queues: Mutex<HashMap<String, VecDeque<MissionRun>>>,
    dispatch_tx: mpsc::Sender<DispatchedMission>,
    next_run: AtomicU64,
}

impl MissionQueue {
    pub fn new(
        definitions: Vec<MissionDefinition>,
        registry: Arc<RobotRegistry>,
        dispatch_tx: mpsc::Sender<DispatchedMission>,
    ) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|definition| (definition.id.clone(), definition))
                .collect(),
            registry,
            queues: Mutex::new(HashMap::new()),
            dispatch_tx,
            next_run: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<RobotRegistry> {
        &self.registry
    }

    /// Queues a run and tries to start it right away.
    ///
    /// Priority runs go behind other priority runs but ahead of every normal
    /// run.
    pub async fn enqueue_run(&self, run: MissionRun) -> Result<EnqueueReceipt, EnqueueError> {
        let robot_id = run.robot_id.clone();
        let run_id = run.id.clone();
        {
            let mut queues = self.queues.lock().await;
            let queue = queues.entry(robot_id.clone()).or_default();
            let position = if run.is_priority() {
                queue.iter().take_while(|queued| queued.is_priority()).count()
            } else {
                queue.len()
            };
            debug!(robot_id = %robot_id, mission_run_id = %run_id, position, "Queued mission run");
            queue.insert(position, run);
        }

        let disposition = match self.try_dispatch(&robot_id).await? {
            DispatchAttempt::Dispatched(run) if run.id == run_id => EnqueueDisposition::Dispatched,
            attempt => {
                let waiting_on = match attempt {
                    DispatchAttempt::Waiting(reason) => Some(reason),
                    _ => None,
                };
                let position = self
                    .queued(&robot_id)
                    .await
                    .iter()
                    .position(|queued| queued.id == run_id)
                    .unwrap_or_default();
                EnqueueDisposition::Queued {
                    position,
                    waiting_on,
                }
            }
        };

        Ok(EnqueueReceipt {
            mission_run_id: run_id,
            disposition,
        })
    }

    /// Starts the head of the robot's queue if admission allows it.
    pub async fn try_dispatch(&self, robot_id: &str) -> Result<DispatchAttempt, EnqueueError> {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(robot_id) else {
            return Ok(DispatchAttempt::Empty);
        };
        let Some(head) = queue.front() else {
            return Ok(DispatchAttempt::Empty);
        };

        let robot = self
            .registry
            .robot(robot_id)
            .await
            .ok_or_else(|| EnqueueError::UnknownRobot(robot_id.to_string()))?;

        if let AdmissionDecision::Reject(reason) = can_start(&robot, head) {
            debug!(robot_id, reason = reason.code(), "Mission run waiting for admission");
            return Ok(DispatchAttempt::Waiting(reason));
        }

        let permit = self.dispatch_tx.try_reserve().map_err(|e| {
            warn!(robot_id, "Dispatch channel not ready: {}", e);
            EnqueueError::Unavailable(format!("dispatch channel: {}", e))
        })?;

        let Some(run) = queue.pop_front() else {
            return Ok(DispatchAttempt::Empty);
        };
        let robot = self
            .registry
            .update_status(robot_id, RobotStatus::Busy)
            .await
            .unwrap_or(robot);

        info!(
            robot_id,
            mission_run_id = %run.id,
            "Dispatching {:?} mission run to {}",
            run.mission_type,
            robot.name
        );
        permit.send(DispatchedMission {
            mission_run: run.clone(),
            robot,
        });

        Ok(DispatchAttempt::Dispatched(run))
    }

    pub async fn queued(&self, robot_id: &str) -> Vec<MissionRun> {
        self.queues
            .lock()
            .await
            .get(robot_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn next_run_id(&self, mission_definition_id: &str) -> String {
        let n = self.next_run.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", mission_definition_id, Utc::now().timestamp(), n)
    }
}

#[async_trait]
impl MissionEnqueuer for MissionQueue {
    async fn enqueue(
        &self,
        mission_definition_id: &str,
        robot_id: &str,
        installation_code: &str,
    ) -> Result<EnqueueReceipt, EnqueueError> {
        let definition = self
            .definitions
            .get(mission_definition_id)
            .ok_or_else(|| EnqueueError::UnknownMissionDefinition(mission_definition_id.to_string()))?;

        let robot = self
            .registry
            .robot(robot_id)
            .await
            .ok_or_else(|| EnqueueError::UnknownRobot(robot_id.to_string()))?;

        if robot.installation_code != installation_code {
            return Err(EnqueueError::InstallationMismatch {
                robot_id: robot_id.to_string(),
                expected: installation_code.to_string(),
                actual: robot.installation_code,
            });
        }

        let run = MissionRun {
            id: self.next_run_id(&definition.id),
            mission_definition_id: Some(definition.id.clone()),
            robot_id: robot_id.to_string(),
            installation_code: installation_code.to_string(),
            mission_type: definition.mission_type,
            created_at: Utc::now(),
        };

        self.enqueue_run(run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn robot(status: RobotStatus) -> Robot {
        Robot {
            id: "robot-1".to_string(),
            name: "Nova".to_string(),
            isar_id: "isar-1".to_string(),
            installation_code: "HUA".to_string(),
            status,
            isar_connected: true,
            deprecated: false,
            mission_queue_frozen: false,
        }
    }

    fn run(id: &str, mission_type: MissionRunType) -> MissionRun {
        MissionRun {
            id: id.to_string(),
            mission_definition_id: None,
            robot_id: "robot-1".to_string(),
            installation_code: "HUA".to_string(),
            mission_type,
            created_at: Utc::now(),
        }
    }

    async fn queue_with(
        status: RobotStatus,
    ) -> (MissionQueue, mpsc::Receiver<DispatchedMission>) {
        let registry = Arc::new(RobotRegistry::new());
        registry.insert(robot(status)).await;
        let (tx, rx) = mpsc::channel(8);
        let definitions = vec![MissionDefinition {
            id: "def-1".to_string(),
            name: "Weekly gauge reading".to_string(),
            installation_code: "HUA".to_string(),
            mission_type: MissionRunType::Normal,
        }];
        (MissionQueue::new(definitions, registry, tx), rx)
    }

    #[tokio::test]
    async fn available_robot_gets_mission_immediately() {
        let (queue, mut rx) = queue_with(RobotStatus::Available).await;

        let receipt = queue.enqueue("def-1", "robot-1", "HUA").await.unwrap();
        assert_eq!(receipt.disposition, EnqueueDisposition::Dispatched);

        let dispatched = rx.try_recv().unwrap();
        assert_eq!(dispatched.mission_run.id, receipt.mission_run_id);
        assert_eq!(dispatched.robot.status, RobotStatus::Busy);
        assert!(queue.queued("robot-1").await.is_empty());
    }

    #[tokio::test]
    async fn busy_robot_keeps_mission_queued() {
        let (queue, mut rx) = queue_with(RobotStatus::Busy).await;

        let receipt = queue.enqueue("def-1", "robot-1", "HUA").await.unwrap();
        assert_eq!(
            receipt.disposition,
            EnqueueDisposition::Queued {
                position: 0,
                waiting_on: Some(RejectReason::RobotNotAvailable)
            }
        );
        assert!(rx.try_recv().is_err());

        queue
            .registry()
            .update_status("robot-1", RobotStatus::Available)
            .await;
        assert!(matches!(
            queue.try_dispatch("robot-1").await.unwrap(),
            DispatchAttempt::Dispatched(_)
        ));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn priority_runs_jump_the_queue() {
        let (queue, _rx) = queue_with(RobotStatus::Busy).await;

        queue.enqueue_run(run("normal-1", MissionRunType::Normal)).await.unwrap();
        queue.enqueue_run(run("normal-2", MissionRunType::Normal)).await.unwrap();
        queue.enqueue_run(run("home", MissionRunType::ReturnHome)).await.unwrap();
        queue.enqueue_run(run("emergency", MissionRunType::Emergency)).await.unwrap();

        let ids: Vec<String> = queue
            .queued("robot-1")
            .await
            .into_iter()
            .map(|run| run.id)
            .collect();
        assert_eq!(ids, vec!["home", "emergency", "normal-1", "normal-2"]);
    }

    #[tokio::test]
    async fn frozen_queue_still_lets_priority_runs_through() {
        let (queue, mut rx) = queue_with(RobotStatus::Available).await;
        queue.registry().freeze_queue("robot-1").await;

        let normal = queue.enqueue_run(run("normal", MissionRunType::Normal)).await.unwrap();
        assert_eq!(
            normal.disposition,
            EnqueueDisposition::Queued {
                position: 0,
                waiting_on: Some(RejectReason::QueueFrozen)
            }
        );

        let home = queue.enqueue_run(run("home", MissionRunType::ReturnHome)).await.unwrap();
        assert_eq!(home.disposition, EnqueueDisposition::Dispatched);
        assert_eq!(rx.try_recv().unwrap().mission_run.id, "home");
    }

    #[tokio::test]
    async fn enqueue_validates_definition_robot_and_installation() {
        let (queue, _rx) = queue_with(RobotStatus::Available).await;

        assert_eq!(
            queue.enqueue("missing", "robot-1", "HUA").await,
            Err(EnqueueError::UnknownMissionDefinition("missing".to_string()))
        );
        assert_eq!(
            queue.enqueue("def-1", "ghost", "HUA").await,
            Err(EnqueueError::UnknownRobot("ghost".to_string()))
        );
        assert!(matches!(
            queue.enqueue("def-1", "robot-1", "KAA").await,
            Err(EnqueueError::InstallationMismatch { .. })
        ));
    }
}
