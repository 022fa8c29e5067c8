//! Job Registry
//!
//! Owner ID -> live job, at most one per owner. Scheduling and unscheduling
//! are both idempotent.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::engine::JobEngine;
use super::types::{Job, JobCallback, JobKind, Recurrence};
use crate::errors::SchedulerResult;

pub struct JobRegistry {
    kind: JobKind,
    engine: Arc<JobEngine>,
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    pub fn new(kind: JobKind, engine: Arc<JobEngine>) -> Self {
        Self {
            kind,
            engine,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<JobEngine> {
        &self.engine
    }

    /// Register a job for `owner_id`.
    ///
    /// Returns `Ok(false)` without touching the engine if the owner already
    /// has a job.
    pub async fn schedule(
        &self,
        owner_id: Uuid,
        recurrence: Recurrence,
        callback: JobCallback,
    ) -> SchedulerResult<bool> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&owner_id) {
            debug!("{} {} already scheduled, skipping", self.kind, owner_id);
            return Ok(false);
        }

        let description = format!("{recurrence:?}");
        let handle = self.engine.schedule(owner_id, recurrence, callback)?;
        jobs.insert(
            owner_id,
            Job {
                owner_id,
                kind: self.kind,
                recurrence: description,
                scheduled_at: Utc::now(),
                handle,
            },
        );
        Ok(true)
    }

    /// Remove and cancel the job for `owner_id`; returns whether one existed
    pub async fn unschedule(&self, owner_id: Uuid) -> bool {
        match self.jobs.write().await.remove(&owner_id) {
            Some(job) => {
                job.handle.cancel();
                debug!(
                    "{} {} unscheduled (job {})",
                    self.kind,
                    owner_id,
                    job.engine_job_id()
                );
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, owner_id: Uuid) -> bool {
        self.jobs.read().await.contains_key(&owner_id)
    }

    pub async fn get(&self, owner_id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&owner_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn owners(&self) -> Vec<Uuid> {
        self.jobs.read().await.keys().copied().collect()
    }

    /// Unschedule everything
    pub async fn clear(&self) -> usize {
        let jobs: Vec<Job> = self.jobs.write().await.drain().map(|(_, job)| job).collect();
        for job in &jobs {
            job.handle.cancel();
        }
        jobs.len()
    }
}
