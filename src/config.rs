//! Application configuration
//!
//! One TOML file holds every section. The file is looked up in this order:
//!
//! 1. the first command line argument
//! 2. `$FLOTILLA_CONFIG`
//! 3. `<config dir>/flotilla-dispatch/config.toml`
//!
//! A missing file is written with defaults so there is always something to
//! edit. The broker password can be kept out of the file through
//! `$FLOTILLA_MQTT_PASSWORD`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn, Level};

use crate::fleet::{FleetConfig, MissionDefinition};
use crate::mqtt::MqttConfig;
use crate::scheduling::models::AutoScheduleJob;
use crate::scheduling::{CivilClock, SchedulerSettings};

const APP_DIR: &str = "flotilla-dispatch";
const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "FLOTILLA_CONFIG";
pub const MQTT_PASSWORD_ENV: &str = "FLOTILLA_MQTT_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine a config directory, pass a config path instead")]
    NoConfigDir,

    #[error("Failed to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_secs: u64,
    /// Defaults to one tick interval
    pub due_window_secs: Option<u64>,
    /// Civil clock of the schedule times; local time when unset
    pub utc_offset_minutes: Option<i32>,
    /// Installations whose jobs run; empty means all
    pub active_installations: Vec<String>,
    pub jobs: Vec<AutoScheduleJob>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 30,
            due_window_secs: None,
            utc_offset_minutes: None,
            active_installations: Vec::new(),
            jobs: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn settings(&self) -> Result<SchedulerSettings, ConfigError> {
        let clock = match self.utc_offset_minutes {
            None => CivilClock::Local,
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .map(CivilClock::Fixed)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("utc offset of {} minutes is out of range", minutes))
                })?,
        };

        Ok(SchedulerSettings {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            due_window: self.due_window_secs.map(Duration::from_secs),
            clock,
        })
    }

    pub fn active_installations(&self) -> Option<HashSet<String>> {
        if self.active_installations.is_empty() {
            None
        } else {
            Some(self.active_installations.iter().cloned().collect())
        }
    }
}

// scalars first, toml wants tables after plain values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub shutdown_grace_secs: u64,
    pub mqtt: MqttConfig,
    pub scheduler: SchedulerConfig,
    pub fleet: FleetConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mission_definitions: Vec<MissionDefinition>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            shutdown_grace_secs: 5,
            mqtt: MqttConfig::default(),
            scheduler: SchedulerConfig::default(),
            fleet: FleetConfig::default(),
            mission_definitions: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Picks the config file from the CLI argument, the environment or the
    /// platform config directory.
    pub fn resolve_path(cli_arg: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = cli_arg {
            return Ok(path);
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Reads the config at `path`, writing the defaults there first if the
    /// file does not exist yet.
    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut config = if tokio::fs::try_exists(path).await.map_err(io_err)? {
            debug!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await.map_err(io_err)?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            warn!("Config file {:?} does not exist, writing defaults", path);
            let config = AppConfig::default();
            config.save(path).await?;
            config
        };

        config.apply_password_override(std::env::var(MQTT_PASSWORD_ENV).ok());
        config.validate()?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(io_err)
    }

    pub fn apply_password_override(&mut self, password: Option<String>) {
        if let Some(password) = password {
            debug!("Using broker password from {}", MQTT_PASSWORD_ENV);
            self.mqtt.password = password;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level()?;

        if self.scheduler.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.due_window_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "scheduler.due_window_secs must be greater than zero".to_string(),
            ));
        }
        self.scheduler.settings()?;

        for job in &self.scheduler.jobs {
            if job.days_of_week.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "schedule job {} has no days of week",
                    job.id
                )));
            }
            if job.times_of_day.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "schedule job {} has no times of day",
                    job.id
                )));
            }
        }

        let definitions: HashSet<&str> = self
            .mission_definitions
            .iter()
            .map(|definition| definition.id.as_str())
            .collect();
        if let Some(job) = self
            .scheduler
            .jobs
            .iter()
            .find(|job| !definitions.contains(job.mission_definition_id.as_str()))
        {
            return Err(ConfigError::Invalid(format!(
                "schedule job {} refers to unknown mission definition {}",
                job.id, job.mission_definition_id
            )));
        }

        Ok(())
    }

    pub fn level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    const SAMPLE: &str = r#"
log_level = "debug"
shutdown_grace_secs = 2

[mqtt]
host = "broker.example"
port = 8883
use_tls = true
fail_on_max_retries = true

[scheduler]
tick_interval_secs = 10
utc_offset_minutes = 60

[[scheduler.jobs]]
id = "job-1"
mission_definition_id = "def-1"
robot_id = "isar-1"
installation_code = "HUA"
days_of_week = ["Mon", "Thu"]
times_of_day = ["08:00:00", "14:30:00"]

[fleet]
installation_code = "HUA"

[[mission_definitions]]
id = "def-1"
name = "Gauge round"
installation_code = "HUA"
"#;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = AppConfig::load_or_create(&path).await.unwrap();
        assert_eq!(config.mqtt.port, 1883);
        assert!(path.exists());

        let reloaded = AppConfig::load_or_create(&path).await.unwrap();
        assert_eq!(reloaded.scheduler, config.scheduler);
    }

    #[tokio::test]
    async fn parses_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let config = AppConfig::load_or_create(&path).await.unwrap();
        assert_eq!(config.level().unwrap(), Level::DEBUG);
        assert_eq!(config.mqtt.host, "broker.example");
        assert!(config.mqtt.use_tls);
        assert_eq!(config.mqtt.reconnect_delay_secs, 5);

        let job = &config.scheduler.jobs[0];
        assert_eq!(job.days_of_week, vec![Weekday::Mon, Weekday::Thu]);
        assert_eq!(job.times_of_day[1], NaiveTime::from_hms_opt(14, 30, 0).unwrap());

        let settings = config.scheduler.settings().unwrap();
        assert_eq!(settings.tick_interval, Duration::from_secs(10));
        assert_eq!(
            settings.clock,
            CivilClock::Fixed(FixedOffset::east_opt(3600).unwrap())
        );
    }

    #[tokio::test]
    async fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "log_level = [").await.unwrap();

        assert!(matches!(
            AppConfig::load_or_create(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_zero_intervals_and_dangling_jobs() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.scheduler.tick_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.scheduler.due_window_secs = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.mission_definitions.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_jobs_that_can_never_fire() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.scheduler.jobs[0].days_of_week.clear();
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => {
                assert!(msg.contains("job-1"), "{}", msg);
                assert!(msg.contains("days of week"), "{}", msg);
            }
            other => panic!("unexpected result {:?}", other),
        }

        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.scheduler.jobs[0].times_of_day.clear();
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => {
                assert!(msg.contains("job-1"), "{}", msg);
                assert!(msg.contains("times of day"), "{}", msg);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn password_override_replaces_file_value() {
        let mut config = AppConfig::default();
        config.apply_password_override(None);
        assert_eq!(config.mqtt.password, "");
        config.apply_password_override(Some("from-env".to_string()));
        assert_eq!(config.mqtt.password, "from-env");
    }

    #[test]
    fn explicit_path_wins() {
        let path = AppConfig::resolve_path(Some(PathBuf::from("/tmp/flotilla.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/flotilla.toml"));
    }
}
