use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::mission_queue::{DispatchAttempt, MissionQueue};
use super::registry::{Liveness, RobotDirectory, RobotRegistry};
use crate::events::{EventHubBuilder, SubscriptionId};
use crate::mqtt::messages::{
    IsarRobotHeartbeatMessage, IsarRobotInfoMessage, IsarStatusMessage,
};
use crate::scheduling::models::RobotStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Installation new robots are registered under
    pub installation_code: String,
    /// Silence after which a robot counts as disconnected
    pub heartbeat_timeout_secs: u64,
    pub heartbeat_sweep_secs: u64,
    pub action_buffer: usize,
    pub dispatch_buffer: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            installation_code: "DEFAULT".to_string(),
            heartbeat_timeout_secs: 30,
            heartbeat_sweep_secs: 5,
            action_buffer: 256,
            dispatch_buffer: 32,
        }
    }
}

/// Telemetry the fleet reacts to
#[derive(Debug, Clone)]
pub enum FleetAction {
    RobotInfo(IsarRobotInfoMessage),
    Status {
        isar_id: String,
        status: RobotStatus,
    },
    Heartbeat {
        isar_id: String,
        at: DateTime<Utc>,
    },
}

/// Sending half handed to the event hub
#[derive(Debug, Clone)]
pub struct FleetHandle {
    tx: Sender<FleetAction>,
}

impl FleetHandle {
    /// Subscribes the fleet to robot telemetry.
    ///
    /// Handlers only forward into the worker's channel; when it is full the
    /// message is dropped with a warning.
    pub fn register(&self, hub: &mut EventHubBuilder) -> Vec<SubscriptionId> {
        let info_tx = self.tx.clone();
        let status_tx = self.tx.clone();
        let heartbeat_tx = self.tx.clone();

        vec![
            hub.subscribe::<IsarRobotInfoMessage, _>(move |msg| {
                forward(&info_tx, FleetAction::RobotInfo(msg.clone()))
            }),
            hub.subscribe::<IsarStatusMessage, _>(move |msg| {
                forward(
                    &status_tx,
                    FleetAction::Status {
                        isar_id: msg.isar_id.clone(),
                        status: msg.status,
                    },
                )
            }),
            hub.subscribe::<IsarRobotHeartbeatMessage, _>(move |msg| {
                forward(
                    &heartbeat_tx,
                    FleetAction::Heartbeat {
                        isar_id: msg.isar_id.clone(),
                        at: msg.timestamp,
                    },
                )
            }),
        ]
    }

    pub fn sender(&self) -> Sender<FleetAction> {
        self.tx.clone()
    }
}

fn forward(tx: &Sender<FleetAction>, action: FleetAction) {
    if let Err(e) = tx.try_send(action) {
        warn!("Fleet worker not keeping up, dropping action: {}", e);
    }
}

/// Applies telemetry to the registry and dispatches queued missions
pub struct FleetWorker {
    registry: Arc<RobotRegistry>,
    queue: Arc<MissionQueue>,
    config: FleetConfig,
    rx: Receiver<FleetAction>,
}

impl FleetWorker {
    pub fn new(queue: Arc<MissionQueue>, config: FleetConfig) -> (Self, FleetHandle) {
        let (tx, rx) = channel(config.action_buffer.max(1));
        let worker = Self {
            registry: queue.registry().clone(),
            queue,
            config,
            rx,
        };
        (worker, FleetHandle { tx })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Fleet worker running");

        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(
            self.config.heartbeat_sweep_secs.max(1),
        ));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                action = self.rx.recv() => match action {
                    Some(action) => self.apply(action).await,
                    None => {
                        debug!("All fleet handles dropped");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    self.sweep(Utc::now()).await;
                }
            }
        }

        info!("Fleet worker stopped");
    }

    pub async fn apply(&self, action: FleetAction) {
        match action {
            FleetAction::RobotInfo(info) => {
                let robot = self
                    .registry
                    .register(&info, &self.config.installation_code)
                    .await;
                self.dispatch(&robot.id).await;
            }
            FleetAction::Status { isar_id, status } => {
                let Some(robot) = self.registry.robot_by_isar_id(&isar_id).await else {
                    info!(isar_id = %isar_id, "Status from unknown robot, waiting for robot info");
                    return;
                };
                if self.registry.update_status(&robot.id, status).await.is_some()
                    && status == RobotStatus::Available
                {
                    self.dispatch(&robot.id).await;
                }
            }
            FleetAction::Heartbeat { isar_id, at } => {
                let Some(robot) = self.registry.robot_by_isar_id(&isar_id).await else {
                    debug!(isar_id = %isar_id, "Heartbeat from unknown robot");
                    return;
                };
                if self.registry.record_heartbeat(&robot.id, at).await == Some(Liveness::Reconnected) {
                    self.dispatch(&robot.id).await;
                }
            }
        }
    }

    /// Runs the heartbeat watchdog once.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::seconds(
            i64::try_from(self.config.heartbeat_timeout_secs).unwrap_or(i64::MAX),
        );
        self.registry.expire_heartbeats(now, timeout).await
    }

    async fn dispatch(&self, robot_id: &str) {
        match self.queue.try_dispatch(robot_id).await {
            Ok(DispatchAttempt::Dispatched(run)) => {
                debug!(robot_id, mission_run_id = %run.id, "Queued mission started")
            }
            Ok(DispatchAttempt::Waiting(reason)) => {
                debug!(robot_id, reason = reason.code(), "Queued mission still waiting")
            }
            Ok(DispatchAttempt::Empty) => {}
            Err(e) => error!(robot_id, "Failed to dispatch queued mission: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::mission_queue::{DispatchedMission, MissionDefinition};
    use crate::scheduling::auto_scheduler::MissionEnqueuer;
    use crate::scheduling::models::MissionRunType;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn info(at: DateTime<Utc>) -> IsarRobotInfoMessage {
        IsarRobotInfoMessage {
            robot_name: "Nova".to_string(),
            isar_id: "isar-1".to_string(),
            robot_model: None,
            robot_serial_number: None,
            robot_asset: None,
            host: None,
            port: None,
            capabilities: vec![],
            timestamp: at,
        }
    }

    fn worker() -> (FleetWorker, Arc<MissionQueue>, mpsc::Receiver<DispatchedMission>) {
        let (tx, rx) = mpsc::channel(8);
        let queue = Arc::new(MissionQueue::new(
            vec![MissionDefinition {
                id: "def-1".to_string(),
                name: "Gauge round".to_string(),
                installation_code: "HUA".to_string(),
                mission_type: MissionRunType::Normal,
            }],
            Arc::new(RobotRegistry::new()),
            tx,
        ));
        let config = FleetConfig {
            installation_code: "HUA".to_string(),
            ..Default::default()
        };
        let (worker, _handle) = FleetWorker::new(queue.clone(), config);
        (worker, queue, rx)
    }

    #[tokio::test]
    async fn available_status_releases_queued_mission() {
        let (worker, queue, mut rx) = worker();

        worker.apply(FleetAction::RobotInfo(info(t(0)))).await;
        queue.enqueue("def-1", "isar-1", "HUA").await.unwrap();
        assert!(rx.try_recv().is_err());

        worker
            .apply(FleetAction::Status {
                isar_id: "isar-1".to_string(),
                status: RobotStatus::Available,
            })
            .await;

        let dispatched = rx.try_recv().unwrap();
        assert_eq!(dispatched.robot.id, "isar-1");
    }

    #[tokio::test]
    async fn sweep_disconnects_silent_robots() {
        let (worker, queue, _rx) = worker();
        worker.apply(FleetAction::RobotInfo(info(t(0)))).await;

        assert_eq!(worker.sweep(t(31)).await, vec!["isar-1".to_string()]);
        let robot = queue.registry().robot("isar-1").await.unwrap();
        assert!(!robot.isar_connected);

        worker
            .apply(FleetAction::Heartbeat {
                isar_id: "isar-1".to_string(),
                at: t(35),
            })
            .await;
        assert!(queue.registry().robot("isar-1").await.unwrap().isar_connected);
    }

    #[tokio::test]
    async fn telemetry_for_unknown_robots_is_ignored() {
        let (worker, queue, _rx) = worker();
        worker
            .apply(FleetAction::Status {
                isar_id: "ghost".to_string(),
                status: RobotStatus::Available,
            })
            .await;
        assert!(queue.registry().robots().await.is_empty());
    }

    #[tokio::test]
    async fn handlers_forward_into_the_worker_channel() {
        let (mut worker, _queue, _rx) = worker();
        let (tx, rx) = channel(4);
        worker.rx = rx;
        let handle = FleetHandle { tx };

        let mut builder = EventHubBuilder::new();
        assert_eq!(handle.register(&mut builder).len(), 3);
        let hub = builder.build();

        hub.publish(&crate::mqtt::messages::TelemetryMessage::from(info(t(0))));
        assert!(matches!(
            worker.rx.try_recv(),
            Ok(FleetAction::RobotInfo(_))
        ));
    }
}
