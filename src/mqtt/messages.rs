//! Telemetry message schemas
//!
//! One struct per topic family, decoded from JSON. Enumerations are carried by
//! name and every status enum has an `Unknown` fallback, so a robot controller
//! running a newer or older release does not break decoding.
//!
//! [`TelemetryMessage`] is the tagged union the event hub dispatches on; its
//! [`MessageKind`] is the routing key.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduling::models::RobotStatus;

/// Routing tag, one per schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    IsarStatus,
    IsarRobotInfo,
    IsarRobotHeartbeat,
    IsarMissionAborted,
    IsarMission,
    IsarTask,
    IsarBattery,
    IsarPressure,
    IsarPose,
    IsarCloudHealth,
    IsarInterventionNeeded,
    IsarStartup,
    SaraVisualizationAvailable,
    SaraAnalysisResultAvailable,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsarMissionStatus {
    NotStarted,
    InProgress,
    Paused,
    Failed,
    Successful,
    PartiallySuccessful,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsarTaskStatus {
    NotStarted,
    InProgress,
    Paused,
    Failed,
    Successful,
    PartiallySuccessful,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarStatusMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub status: RobotStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarRobotInfoMessage {
    pub robot_name: String,
    pub isar_id: String,
    #[serde(default)]
    pub robot_model: Option<String>,
    #[serde(default)]
    pub robot_serial_number: Option<String>,
    #[serde(default)]
    pub robot_asset: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarRobotHeartbeatMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarMissionAbortedMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub mission_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub can_be_retried: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarMissionMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub mission_id: String,
    pub status: IsarMissionStatus,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarTaskMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub mission_id: String,
    pub task_id: String,
    #[serde(default)]
    pub task_type: Option<String>,
    pub status: IsarTaskStatus,
    #[serde(default)]
    pub error_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarBatteryMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub battery_level: f32,
    #[serde(default)]
    pub battery_state: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarPressureMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub pressure_level: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarFrame {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub frame: Option<IsarFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarOrientation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
    #[serde(default)]
    pub frame: Option<IsarFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarPose {
    pub position: IsarPosition,
    pub orientation: IsarOrientation,
    pub frame: IsarFrame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarPoseMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub pose: IsarPose,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarCloudHealthMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarInterventionNeededMessage {
    pub robot_name: String,
    pub isar_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsarStartupMessage {
    pub robot_name: String,
    pub isar_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaraVisualizationAvailableMessage {
    pub inspection_id: String,
    pub storage_account: String,
    pub blob_container: String,
    pub blob_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaraAnalysisResultMessage {
    pub inspection_id: String,
    #[serde(default)]
    pub analysis_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Schema types that can be carried by a [`TelemetryMessage`]
///
/// Lets consumers subscribe with a concrete payload type while the hub keys
/// its table on [`MessageKind`].
pub trait TelemetryPayload: Sized + Send + Sync + 'static {
    const KIND: MessageKind;

    fn extract(message: &TelemetryMessage) -> Option<&Self>;
}

macro_rules! telemetry_messages {
    ($($variant:ident => $payload:ty),+ $(,)?) => {
        /// A decoded telemetry message
        #[derive(Debug, Clone, PartialEq)]
        pub enum TelemetryMessage {
            $($variant($payload),)+
        }

        impl TelemetryMessage {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(TelemetryMessage::$variant(_) => MessageKind::$variant,)+
                }
            }

            /// Decodes `payload` with the schema bound to `kind`.
            pub fn decode(kind: MessageKind, payload: &[u8]) -> Result<Self, serde_json::Error> {
                match kind {
                    $(MessageKind::$variant => serde_json::from_slice::<$payload>(payload)
                        .map(TelemetryMessage::$variant),)+
                }
            }
        }

        $(
            impl TelemetryPayload for $payload {
                const KIND: MessageKind = MessageKind::$variant;

                fn extract(message: &TelemetryMessage) -> Option<&Self> {
                    match message {
                        TelemetryMessage::$variant(inner) => Some(inner),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }

            impl From<$payload> for TelemetryMessage {
                fn from(payload: $payload) -> Self {
                    TelemetryMessage::$variant(payload)
                }
            }
        )+
    };
}

telemetry_messages! {
    IsarStatus => IsarStatusMessage,
    IsarRobotInfo => IsarRobotInfoMessage,
    IsarRobotHeartbeat => IsarRobotHeartbeatMessage,
    IsarMissionAborted => IsarMissionAbortedMessage,
    IsarMission => IsarMissionMessage,
    IsarTask => IsarTaskMessage,
    IsarBattery => IsarBatteryMessage,
    IsarPressure => IsarPressureMessage,
    IsarPose => IsarPoseMessage,
    IsarCloudHealth => IsarCloudHealthMessage,
    IsarInterventionNeeded => IsarInterventionNeededMessage,
    IsarStartup => IsarStartupMessage,
    SaraVisualizationAvailable => SaraVisualizationAvailableMessage,
    SaraAnalysisResultAvailable => SaraAnalysisResultMessage,
}

impl TelemetryMessage {
    /// Id of the robot controller that sent the message, if it is an ISAR message.
    pub fn isar_id(&self) -> Option<&str> {
        match self {
            TelemetryMessage::IsarStatus(m) => Some(&m.isar_id),
            TelemetryMessage::IsarRobotInfo(m) => Some(&m.isar_id),
            TelemetryMessage::IsarRobotHeartbeat(m) => Some(&m.isar_id),
            TelemetryMessage::IsarMissionAborted(m) => Some(&m.isar_id),
            TelemetryMessage::IsarMission(m) => Some(&m.isar_id),
            TelemetryMessage::IsarTask(m) => Some(&m.isar_id),
            TelemetryMessage::IsarBattery(m) => Some(&m.isar_id),
            TelemetryMessage::IsarPressure(m) => Some(&m.isar_id),
            TelemetryMessage::IsarPose(m) => Some(&m.isar_id),
            TelemetryMessage::IsarCloudHealth(m) => Some(&m.isar_id),
            TelemetryMessage::IsarInterventionNeeded(m) => Some(&m.isar_id),
            TelemetryMessage::IsarStartup(m) => Some(&m.isar_id),
            TelemetryMessage::SaraVisualizationAvailable(_)
            | TelemetryMessage::SaraAnalysisResultAvailable(_) => None,
        }
    }
}
