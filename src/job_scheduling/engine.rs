//! Recurring job engine
//!
//! Every job is its own tokio task. Firings of one job run one after the
//! other inside that task, so a slow firing delays the next one and ticks
//! missed meanwhile are dropped rather than queued.

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{JobCallback, JobHandle, Recurrence};
use crate::errors::{EngineError, SchedulerError, SchedulerResult};

pub struct JobEngine {
    root: CancellationToken,
    tracker: TaskTracker,
}

impl Default for JobEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobEngine {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Start a recurring job for `owner_id`
    pub fn schedule(
        &self,
        owner_id: Uuid,
        recurrence: Recurrence,
        callback: JobCallback,
    ) -> SchedulerResult<JobHandle> {
        if self.root.is_cancelled() {
            return Err(EngineError::ShuttingDown.into());
        }
        if let Recurrence::Interval { every, .. } = &recurrence
            && every.is_zero()
        {
            return Err(SchedulerError::invalid_schedule("interval must be greater than zero"));
        }

        let job_id = Uuid::new_v4();
        let cancel = self.root.child_token();
        debug!("Job {} for owner {} scheduled: {:?}", job_id, owner_id, recurrence);

        let token = cancel.clone();
        match recurrence {
            Recurrence::Interval {
                every,
                first_run_delay,
            } => {
                self.tracker
                    .spawn(run_interval(owner_id, every, first_run_delay, token, callback));
            }
            Recurrence::Cron(schedule) => {
                self.tracker
                    .spawn(run_cron(owner_id, *schedule, token, callback));
            }
        }

        Ok(JobHandle { job_id, cancel })
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Stop all jobs from firing again and wait up to `grace` for in-flight
    /// firings to finish.
    pub async fn shutdown(&self, grace: Duration) {
        if !self.root.is_cancelled() {
            info!("Shutting down job engine ({} job task(s))", self.tracker.len());
        }
        self.root.cancel();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!("Job engine shutdown grace period of {:?} elapsed", grace);
        }
    }
}

async fn run_interval(
    owner_id: Uuid,
    every: Duration,
    first_run_delay: Duration,
    cancel: CancellationToken,
    callback: JobCallback,
) {
    let mut ticker = interval_at(Instant::now() + first_run_delay, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        callback(owner_id).await;
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!("Interval job for owner {} stopped", owner_id);
}

async fn run_cron(
    owner_id: Uuid,
    schedule: cron::Schedule,
    cancel: CancellationToken,
    callback: JobCallback,
) {
    let mut last_fire: Option<DateTime<Local>> = None;

    loop {
        let now = Local::now();
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.after(&from).next() else {
            info!("Cron schedule for owner {} has no further occurrences", owner_id);
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        last_fire = Some(next);
        callback(owner_id).await;
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!("Cron job for owner {} stopped", owner_id);
}
