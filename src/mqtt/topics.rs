//! Wildcard topic routing
//!
//! Maps the telemetry topic space onto [`MessageKind`] tags. Every pattern in
//! [`TOPIC_TABLE`] is an MQTT filter; an inbound topic is resolved by testing it
//! against each filter and demanding at most one hit.
//!
//! Matching is done level by level between two filters rather than between a
//! filter and a plain string, so a probe topic that still carries wildcards is
//! checked for overlap with the registered patterns:
//!
//! ```text
//! isar/+/task/+   vs  isar/extraLevel/task/+   -> match
//! many/#          vs  many/specific            -> match
//! isar/+/status   vs  isar/robot/battery       -> no match
//! ```

use std::fmt;

use tracing::{debug, error};

use super::error::TopicError;
use super::messages::MessageKind;

/// Static routing table of the deployment.
pub static TOPIC_TABLE: &[(&str, MessageKind)] = &[
    ("isar/+/status", MessageKind::IsarStatus),
    ("isar/+/robot_info", MessageKind::IsarRobotInfo),
    ("isar/+/robot_heartbeat", MessageKind::IsarRobotHeartbeat),
    ("isar/+/aborted_mission", MessageKind::IsarMissionAborted),
    ("isar/+/mission/+", MessageKind::IsarMission),
    ("isar/+/task/+", MessageKind::IsarTask),
    ("isar/+/battery", MessageKind::IsarBattery),
    ("isar/+/pressure", MessageKind::IsarPressure),
    ("isar/+/pose", MessageKind::IsarPose),
    ("isar/+/cloud_health", MessageKind::IsarCloudHealth),
    ("isar/+/intervention_needed", MessageKind::IsarInterventionNeeded),
    ("isar/+/startup", MessageKind::IsarStartup),
    (
        "sara/visualization_available",
        MessageKind::SaraVisualizationAvailable,
    ),
    (
        "sara/analysis_result_available",
        MessageKind::SaraAnalysisResultAvailable,
    ),
];

/// One level of a topic filter
#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    /// `+`
    Single,
    /// `#`, only valid as the last level
    Multi,
}

/// Parsed MQTT topic filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<Level>,
}

impl TopicFilter {
    /// Parses a filter, rejecting the shapes a broker would refuse.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        if raw.is_empty() {
            return Err(TopicError::InvalidFilter {
                filter: raw.to_string(),
                reason: "filter is empty".to_string(),
            });
        }

        let parts: Vec<&str> = raw.split('/').collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());

        for (idx, part) in parts.iter().enumerate() {
            let level = match *part {
                "#" if idx == last => Level::Multi,
                "#" => {
                    return Err(TopicError::InvalidFilter {
                        filter: raw.to_string(),
                        reason: "'#' must be the last level".to_string(),
                    })
                }
                "+" => Level::Single,
                other if other.contains('#') || other.contains('+') => {
                    return Err(TopicError::InvalidFilter {
                        filter: raw.to_string(),
                        reason: format!("wildcard inside level '{}'", other),
                    })
                }
                other => Level::Literal(other.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            raw: raw.to_string(),
            levels,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if at least one concrete topic is accepted by both filters.
    ///
    /// A plain topic is a filter without wildcards, so this also answers
    /// "does this filter match this topic".
    pub fn overlaps(&self, other: &TopicFilter) -> bool {
        let mut lhs = self.levels.iter();
        let mut rhs = other.levels.iter();

        loop {
            match (lhs.next(), rhs.next()) {
                (Some(Level::Multi), _) | (_, Some(Level::Multi)) => return true,
                (Some(a), Some(b)) => {
                    let level_matches = match (a, b) {
                        (Level::Single, _) | (_, Level::Single) => true,
                        (Level::Literal(x), Level::Literal(y)) => x == y,
                        _ => false,
                    };
                    if !level_matches {
                        return false;
                    }
                }
                (None, None) => return true,
                // a trailing `#` on the longer side was handled above, `a/#` also matches `a`
                (None, Some(_)) | (Some(_), None) => return false,
            }
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Resolves concrete topics to the message kind registered for them.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    routes: Vec<(TopicFilter, MessageKind)>,
}

impl TopicRouter {
    /// Router over the deployment's [`TOPIC_TABLE`].
    pub fn with_default_table() -> Result<Self, TopicError> {
        Self::from_table(TOPIC_TABLE)
    }

    pub fn from_table(table: &[(&str, MessageKind)]) -> Result<Self, TopicError> {
        let routes = table
            .iter()
            .map(|(pattern, kind)| TopicFilter::parse(pattern).map(|filter| (filter, *kind)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Topic router created with {} routes", routes.len());
        Ok(Self { routes })
    }

    pub fn routes(&self) -> impl Iterator<Item = (&TopicFilter, MessageKind)> {
        self.routes.iter().map(|(filter, kind)| (filter, *kind))
    }

    /// Resolves a topic to exactly one kind.
    ///
    /// `Ok(None)` means no pattern covers the topic. Two or more covering
    /// patterns is a configuration bug and is reported as an error instead of
    /// picking one of them.
    pub fn resolve(&self, topic: &str) -> Result<Option<MessageKind>, TopicError> {
        let probe = TopicFilter::parse(topic)?;

        let matches: Vec<&(TopicFilter, MessageKind)> = self
            .routes
            .iter()
            .filter(|(filter, _)| filter.overlaps(&probe))
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [(_, kind)] => Ok(Some(*kind)),
            many => {
                let patterns: Vec<String> =
                    many.iter().map(|(filter, _)| filter.to_string()).collect();
                error!(topic, ?patterns, "Topic matches more than one registered pattern");
                Err(TopicError::ConflictingPatterns {
                    topic: topic.to_string(),
                    patterns,
                })
            }
        }
    }

    /// Checks every pair of registered patterns for overlap.
    pub fn validate(&self) -> Result<(), TopicError> {
        for (idx, (first, _)) in self.routes.iter().enumerate() {
            for (second, _) in self.routes.iter().skip(idx + 1) {
                if first.overlaps(second) {
                    return Err(TopicError::OverlappingPatterns {
                        first: first.to_string(),
                        second: second.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
