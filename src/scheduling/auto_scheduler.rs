//! Recurring mission auto-scheduling
//!
//! A tick loop that looks for schedule slots that have just come due and hands
//! the matching mission definitions to the mission queue.
//!
//! # Tick
//!
//! ```text
//! store.active_jobs() ─► due_slot(now, window) ─► last_fired < slot? ─► record_fired ─► enqueue
//!                                                        │                                 │
//!                                                        └──── skip (already fired)       JobOutcome
//! ```
//!
//! A slot is due while `slot <= now < slot + due_window`. The window defaults to
//! one tick interval so a tick cannot step over a slot; the stored last-fired
//! slot keeps the next tick inside the same window from firing it again.
//!
//! The slot is recorded before the enqueue call, so a job whose enqueue fails
//! is reported once and then waits for its next slot. Shutdown never cuts a
//! job between those two steps.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::admission::RejectReason;
use super::error::{EnqueueError, SchedulerError, StoreError};
use super::models::AutoScheduleJob;

/// Backing store of schedule jobs and their last-fired bookkeeping
#[async_trait]
pub trait AutoScheduleStore: Send + Sync {
    /// Jobs of active installations
    async fn active_jobs(&self) -> Result<Vec<AutoScheduleJob>, StoreError>;

    async fn last_fired(&self, job_id: &str) -> Result<Option<NaiveDateTime>, StoreError>;

    async fn record_fired(&self, job_id: &str, slot: NaiveDateTime) -> Result<(), StoreError>;
}

/// Creates a mission run from a mission definition and queues it for a robot
#[async_trait]
pub trait MissionEnqueuer: Send + Sync {
    async fn enqueue(
        &self,
        mission_definition_id: &str,
        robot_id: &str,
        installation_code: &str,
    ) -> Result<EnqueueReceipt, EnqueueError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueDisposition {
    /// Admitted and handed to the robot straight away
    Dispatched,
    /// Waiting in the robot's queue
    Queued {
        position: usize,
        waiting_on: Option<RejectReason>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub mission_run_id: String,
    pub disposition: EnqueueDisposition,
}

/// Which civil calendar schedule times are written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CivilClock {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl CivilClock {
    pub fn to_civil(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            CivilClock::Local => now.with_timezone(&Local).naive_local(),
            CivilClock::Fixed(offset) => now.with_timezone(offset).naive_local(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: std::time::Duration,
    /// How long after its slot a job still counts as due; `None` means one tick
    pub due_window: Option<std::time::Duration>,
    pub clock: CivilClock,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: std::time::Duration::from_secs(30),
            due_window: None,
            clock: CivilClock::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Enqueued {
        receipt: EnqueueReceipt,
        /// Distance between the scheduled slot and the tick that fired it
        lateness: chrono::Duration,
    },
    EnqueueFailed(EnqueueError),
    StoreFailed(StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub mission_definition_id: String,
    pub robot_id: String,
    pub slot: NaiveDateTime,
    pub result: JobResult,
}

/// Result of one tick, in job order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub jobs_checked: usize,
    pub outcomes: Vec<JobOutcome>,
}

impl TickReport {
    pub fn enqueued(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, JobResult::Enqueued { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.enqueued()
    }
}

pub struct AutoScheduler {
    store: Arc<dyn AutoScheduleStore>,
    enqueuer: Arc<dyn MissionEnqueuer>,
    settings: SchedulerSettings,
    // Held for the whole tick; the loop and `run_once` never scan concurrently
    tick_lock: Mutex<()>,
}

impl AutoScheduler {
    pub fn new(
        store: Arc<dyn AutoScheduleStore>,
        enqueuer: Arc<dyn MissionEnqueuer>,
        settings: SchedulerSettings,
    ) -> Result<Self, SchedulerError> {
        if settings.tick_interval.is_zero() {
            return Err(SchedulerError::InvalidSettings(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        if settings.due_window.is_some_and(|w| w.is_zero()) {
            return Err(SchedulerError::InvalidSettings(
                "due window must be greater than zero".to_string(),
            ));
        }

        info!(
            "Auto scheduler configured: tick every {:?}, due window {:?}",
            settings.tick_interval,
            settings.due_window.unwrap_or(settings.tick_interval)
        );

        Ok(Self {
            store,
            enqueuer,
            settings,
            tick_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn due_window(&self) -> chrono::Duration {
        let window = self.settings.due_window.unwrap_or(self.settings.tick_interval);
        chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX)
    }

    /// Runs ticks until `cancel` fires.
    ///
    /// A failing tick is logged and retried on the next interval. A tick that
    /// overruns the interval delays the next one instead of overlapping it.
    /// Cancellation is only observed between jobs: a job whose slot has been
    /// recorded always gets its enqueue call.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Auto scheduler running");

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.tick(Utc::now(), Some(&cancel)).await {
                Ok(report) if !report.outcomes.is_empty() => info!(
                    "Auto schedule tick: {} jobs checked, {} enqueued, {} failed",
                    report.jobs_checked,
                    report.enqueued(),
                    report.failed()
                ),
                Ok(report) => debug!(
                    "Auto schedule tick: {} jobs checked, nothing due",
                    report.jobs_checked
                ),
                Err(e) => error!("Auto schedule tick failed, retrying next interval: {}", e),
            }
        }

        info!("Auto scheduler stopped");
    }

    /// Runs one tick against the current time and reports what happened.
    pub async fn run_once(&self) -> Result<TickReport, SchedulerError> {
        self.tick_at(Utc::now()).await
    }

    /// Runs one tick as if the current time were `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        self.tick(now, None).await
    }

    async fn tick(
        &self,
        now: DateTime<Utc>,
        cancel: Option<&CancellationToken>,
    ) -> Result<TickReport, SchedulerError> {
        let _guard = self.tick_lock.lock().await;

        let jobs = self.store.active_jobs().await?;
        let civil_now = self.settings.clock.to_civil(now);
        let window = self.due_window();

        let mut report = TickReport {
            at: now,
            jobs_checked: jobs.len(),
            outcomes: Vec::new(),
        };

        for job in jobs {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!("Auto scheduler cancelled, leaving remaining jobs to the next start");
                break;
            }

            let Some(slot) = job.due_slot(civil_now, window) else {
                continue;
            };

            if let Some(outcome) = self.fire(&job, slot, civil_now).await {
                report.outcomes.push(outcome);
            }
        }

        Ok(report)
    }

    /// Fires one due job. `None` if the slot was already fired.
    async fn fire(
        &self,
        job: &AutoScheduleJob,
        slot: NaiveDateTime,
        civil_now: NaiveDateTime,
    ) -> Option<JobOutcome> {
        let outcome = |result| JobOutcome {
            job_id: job.id.clone(),
            mission_definition_id: job.mission_definition_id.clone(),
            robot_id: job.robot_id.clone(),
            slot,
            result,
        };

        match self.store.last_fired(&job.id).await {
            Ok(Some(last)) if last >= slot => {
                debug!(job_id = %job.id, %slot, "Slot already fired");
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(job_id = %job.id, "Could not read last fired slot, deferring: {}", e);
                return Some(outcome(JobResult::StoreFailed(e)));
            }
        }

        if let Err(e) = self.store.record_fired(&job.id, slot).await {
            warn!(job_id = %job.id, "Could not record fired slot, deferring: {}", e);
            return Some(outcome(JobResult::StoreFailed(e)));
        }

        let result = match self
            .enqueuer
            .enqueue(&job.mission_definition_id, &job.robot_id, &job.installation_code)
            .await
        {
            Ok(receipt) => {
                info!(
                    job_id = %job.id,
                    robot_id = %job.robot_id,
                    mission_run_id = %receipt.mission_run_id,
                    "Auto scheduled mission definition {} for slot {}",
                    job.mission_definition_id,
                    slot
                );
                JobResult::Enqueued {
                    receipt,
                    lateness: civil_now - slot,
                }
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    robot_id = %job.robot_id,
                    "Failed to auto schedule mission definition {}: {}",
                    job.mission_definition_id,
                    e
                );
                JobResult::EnqueueFailed(e)
            }
        };

        Some(outcome(result))
    }
}
