use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use super::auto_scheduler::AutoScheduleStore;
use super::error::StoreError;
use super::models::AutoScheduleJob;

/// Schedule store kept in memory, loaded from configuration
///
/// Last-fired slots live only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    jobs: RwLock<Vec<AutoScheduleJob>>,
    // `None` treats every installation as active
    active_installations: Option<HashSet<String>>,
    last_fired: RwLock<HashMap<String, NaiveDateTime>>,
}

impl InMemoryScheduleStore {
    pub fn new(jobs: Vec<AutoScheduleJob>) -> Self {
        Self {
            jobs: RwLock::new(jobs),
            active_installations: None,
            last_fired: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_active_installations(mut self, installations: HashSet<String>) -> Self {
        self.active_installations = Some(installations);
        self
    }

    /// Adds a job or replaces the one with the same id.
    pub async fn upsert_job(&self, job: AutoScheduleJob) {
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job,
            None => jobs.push(job),
        }
    }

    pub async fn remove_job(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|job| job.id != job_id);
        self.last_fired.write().await.remove(job_id);
        jobs.len() != before
    }
}

#[async_trait]
impl AutoScheduleStore for InMemoryScheduleStore {
    async fn active_jobs(&self) -> Result<Vec<AutoScheduleJob>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .filter(|job| {
                self.active_installations
                    .as_ref()
                    .map_or(true, |active| active.contains(&job.installation_code))
            })
            .cloned()
            .collect())
    }

    async fn last_fired(&self, job_id: &str) -> Result<Option<NaiveDateTime>, StoreError> {
        Ok(self.last_fired.read().await.get(job_id).copied())
    }

    async fn record_fired(&self, job_id: &str, slot: NaiveDateTime) -> Result<(), StoreError> {
        if !self.jobs.read().await.iter().any(|job| job.id == job_id) {
            return Err(StoreError::UnknownJob(job_id.to_string()));
        }
        debug!(job_id, %slot, "Recording fired slot");
        self.last_fired
            .write()
            .await
            .insert(job_id.to_string(), slot);
        Ok(())
    }
}
