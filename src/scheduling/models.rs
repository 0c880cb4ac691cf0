//! Robot, mission and schedule snapshots consumed by the scheduling core

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotStatus {
    Available,
    Busy,
    #[default]
    Offline,
    Blocked,
    BlockedProtectiveStop,
    Home,
    ReturningHome,
    Recharging,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RobotStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Robot {
    pub id: String,
    pub name: String,
    pub isar_id: String,
    pub installation_code: String,
    pub status: RobotStatus,
    /// Link to the on-board controller is alive
    pub isar_connected: bool,
    pub deprecated: bool,
    /// Operator paused automatic dispatch for this robot
    pub mission_queue_frozen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MissionRunType {
    #[default]
    Normal,
    Emergency,
    ReturnHome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRun {
    pub id: String,
    pub mission_definition_id: Option<String>,
    pub robot_id: String,
    pub installation_code: String,
    pub mission_type: MissionRunType,
    pub created_at: DateTime<Utc>,
}

impl MissionRun {
    /// Emergency and return-home runs skip the frozen-queue gate.
    pub fn is_priority(&self) -> bool {
        matches!(
            self.mission_type,
            MissionRunType::Emergency | MissionRunType::ReturnHome
        )
    }
}

/// Recurring schedule of one mission definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScheduleJob {
    pub id: String,
    pub mission_definition_id: String,
    pub robot_id: String,
    pub installation_code: String,
    pub days_of_week: Vec<Weekday>,
    /// Civil time of day, seconds resolution
    pub times_of_day: Vec<NaiveTime>,
}

impl AutoScheduleJob {
    /// Most recent scheduled slot in `[now - window, now]`, if any.
    ///
    /// Every civil day the window touches is considered, so a window that
    /// straddles midnight still sees the slot before it. The schedule repeats
    /// weekly, so no lookback goes further than seven days.
    pub fn due_slot(&self, now: NaiveDateTime, window: Duration) -> Option<NaiveDateTime> {
        let today = now.date();
        let week_ago = today
            .checked_sub_signed(Duration::days(7))
            .unwrap_or(NaiveDate::MIN);
        let earliest = now
            .checked_sub_signed(window)
            .map_or(NaiveDate::MIN, |start| start.date())
            .max(week_ago);

        earliest
            .iter_days()
            .take_while(|day| *day <= today)
            .filter(|day| self.days_of_week.contains(&day.weekday()))
            .flat_map(|day| self.times_of_day.iter().map(move |time| day.and_time(*time)))
            .filter(|slot| *slot <= now && now - *slot < window)
            .max()
    }
}
