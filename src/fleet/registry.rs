//! In-memory robot registry fed by telemetry

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::mqtt::messages::IsarRobotInfoMessage;
use crate::scheduling::models::{Robot, RobotStatus};

/// Read access to robot snapshots
#[async_trait]
pub trait RobotDirectory: Send + Sync {
    async fn robot(&self, robot_id: &str) -> Option<Robot>;

    async fn robot_by_isar_id(&self, isar_id: &str) -> Option<Robot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// First heartbeat after the link was considered down
    Reconnected,
}

#[derive(Debug, Clone)]
struct RobotEntry {
    robot: Robot,
    last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct RobotRegistry {
    robots: RwLock<HashMap<String, RobotEntry>>,
}

impl RobotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a robot known up front, e.g. from configuration.
    pub async fn insert(&self, robot: Robot) {
        debug!(robot_id = %robot.id, "Adding robot {}", robot.name);
        self.robots.write().await.insert(
            robot.id.clone(),
            RobotEntry {
                robot,
                last_heartbeat: None,
            },
        );
    }

    /// Creates or refreshes a robot from its `robot_info` announcement.
    ///
    /// Robots are keyed by their isar id; an existing robot keeps its status,
    /// queue and deprecation flags.
    pub async fn register(&self, info: &IsarRobotInfoMessage, installation_code: &str) -> Robot {
        let mut robots = self.robots.write().await;

        let existing_id = robots
            .values()
            .find(|entry| entry.robot.isar_id == info.isar_id)
            .map(|entry| entry.robot.id.clone());

        let entry = match existing_id {
            Some(id) => {
                let entry = robots
                    .entry(id)
                    .or_insert_with(|| new_entry(info, installation_code));
                entry.robot.name = info.robot_name.clone();
                debug!(robot_id = %entry.robot.id, "Refreshed robot info");
                entry
            }
            None => {
                info!(
                    isar_id = %info.isar_id,
                    "Registering new robot {} in installation {}",
                    info.robot_name,
                    installation_code
                );
                robots
                    .entry(info.isar_id.clone())
                    .or_insert_with(|| new_entry(info, installation_code))
            }
        };

        entry.robot.isar_connected = true;
        entry.last_heartbeat = Some(info.timestamp);
        entry.robot.clone()
    }

    pub async fn update_status(&self, robot_id: &str, status: RobotStatus) -> Option<Robot> {
        let mut robots = self.robots.write().await;
        let entry = robots.get_mut(robot_id)?;

        if entry.robot.status != status {
            info!(
                robot_id,
                "Robot {} status {} -> {}", entry.robot.name, entry.robot.status, status
            );
            entry.robot.status = status;
        }
        Some(entry.robot.clone())
    }

    pub async fn record_heartbeat(&self, robot_id: &str, at: DateTime<Utc>) -> Option<Liveness> {
        let mut robots = self.robots.write().await;
        let entry = robots.get_mut(robot_id)?;

        // out-of-order heartbeats never move the clock back
        if entry.last_heartbeat.map_or(true, |last| last < at) {
            entry.last_heartbeat = Some(at);
        }

        if entry.robot.isar_connected {
            Some(Liveness::Alive)
        } else {
            info!(robot_id, "Connection to robot {} restored", entry.robot.name);
            entry.robot.isar_connected = true;
            Some(Liveness::Reconnected)
        }
    }

    /// Marks robots whose last heartbeat is older than `timeout` as
    /// disconnected and offline. Returns the ids that changed.
    pub async fn expire_heartbeats(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let mut robots = self.robots.write().await;
        let mut expired = Vec::new();

        for entry in robots.values_mut() {
            let Some(last) = entry.last_heartbeat else {
                continue;
            };
            if entry.robot.isar_connected && now - last > timeout {
                warn!(
                    robot_id = %entry.robot.id,
                    "Connection to robot {} timed out, marking it offline",
                    entry.robot.name
                );
                entry.robot.isar_connected = false;
                entry.robot.status = RobotStatus::Offline;
                expired.push(entry.robot.id.clone());
            }
        }

        expired
    }

    pub async fn freeze_queue(&self, robot_id: &str) -> bool {
        self.set_queue_frozen(robot_id, true).await
    }

    pub async fn unfreeze_queue(&self, robot_id: &str) -> bool {
        self.set_queue_frozen(robot_id, false).await
    }

    async fn set_queue_frozen(&self, robot_id: &str, frozen: bool) -> bool {
        let mut robots = self.robots.write().await;
        match robots.get_mut(robot_id) {
            Some(entry) => {
                info!(robot_id, frozen, "Mission queue freeze changed");
                entry.robot.mission_queue_frozen = frozen;
                true
            }
            None => false,
        }
    }

    pub async fn set_deprecated(&self, robot_id: &str, deprecated: bool) -> bool {
        let mut robots = self.robots.write().await;
        match robots.get_mut(robot_id) {
            Some(entry) => {
                entry.robot.deprecated = deprecated;
                true
            }
            None => false,
        }
    }

    pub async fn robots(&self) -> Vec<Robot> {
        self.robots
            .read()
            .await
            .values()
            .map(|entry| entry.robot.clone())
            .collect()
    }
}

fn new_entry(info: &IsarRobotInfoMessage, installation_code: &str) -> RobotEntry {
    RobotEntry {
        robot: Robot {
            id: info.isar_id.clone(),
            name: info.robot_name.clone(),
            isar_id: info.isar_id.clone(),
            installation_code: installation_code.to_string(),
            status: RobotStatus::Offline,
            isar_connected: true,
            deprecated: false,
            mission_queue_frozen: false,
        },
        last_heartbeat: Some(info.timestamp),
    }
}

#[async_trait]
impl RobotDirectory for RobotRegistry {
    async fn robot(&self, robot_id: &str) -> Option<Robot> {
        self.robots
            .read()
            .await
            .get(robot_id)
            .map(|entry| entry.robot.clone())
    }

    async fn robot_by_isar_id(&self, isar_id: &str) -> Option<Robot> {
        self.robots
            .read()
            .await
            .values()
            .find(|entry| entry.robot.isar_id == isar_id)
            .map(|entry| entry.robot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn info(isar_id: &str, at: DateTime<Utc>) -> IsarRobotInfoMessage {
        IsarRobotInfoMessage {
            robot_name: "Nova".to_string(),
            isar_id: isar_id.to_string(),
            robot_model: None,
            robot_serial_number: None,
            robot_asset: None,
            host: None,
            port: None,
            capabilities: vec![],
            timestamp: at,
        }
    }

    fn t(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap() + Duration::seconds(secs as i64)
    }

    #[tokio::test]
    async fn register_is_idempotent_and_keeps_flags() {
        let registry = RobotRegistry::new();
        let robot = registry.register(&info("isar-1", t(0)), "HUA").await;
        assert_eq!(robot.id, "isar-1");
        assert_eq!(robot.status, RobotStatus::Offline);
        assert!(robot.isar_connected);

        registry.freeze_queue("isar-1").await;
        registry.update_status("isar-1", RobotStatus::Available).await;
        let again = registry.register(&info("isar-1", t(5)), "HUA").await;

        assert!(again.mission_queue_frozen);
        assert_eq!(again.status, RobotStatus::Available);
        assert_eq!(registry.robots().await.len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_timeout_marks_robot_offline() {
        let registry = RobotRegistry::new();
        registry.register(&info("isar-1", t(0)), "HUA").await;
        registry.update_status("isar-1", RobotStatus::Available).await;

        assert!(registry
            .expire_heartbeats(t(10), Duration::seconds(30))
            .await
            .is_empty());
        assert_eq!(
            registry.expire_heartbeats(t(31), Duration::seconds(30)).await,
            vec!["isar-1".to_string()]
        );

        let robot = registry.robot("isar-1").await.unwrap();
        assert!(!robot.isar_connected);
        assert_eq!(robot.status, RobotStatus::Offline);

        assert_eq!(
            registry.record_heartbeat("isar-1", t(40)).await,
            Some(Liveness::Reconnected)
        );
        assert_eq!(
            registry.record_heartbeat("isar-1", t(41)).await,
            Some(Liveness::Alive)
        );
    }

    #[tokio::test]
    async fn unknown_robots_are_reported() {
        let registry = RobotRegistry::new();
        assert_eq!(registry.record_heartbeat("ghost", t(0)).await, None);
        assert!(registry.update_status("ghost", RobotStatus::Busy).await.is_none());
        assert!(!registry.set_deprecated("ghost", true).await);
        assert!(registry.robot_by_isar_id("ghost").await.is_none());
    }
}
