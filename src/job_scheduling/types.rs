//! Shared types for recurring jobs

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::Trigger;

/// Work run on every firing; receives the owner ID and re-reads its state
pub type JobCallback = Arc<dyn Fn(Uuid) -> BoxFuture<'static, ()> + Send + Sync>;

/// Which scheduler a job belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Binding,
    Workflow,
}

/// When a job fires
#[derive(Clone)]
pub enum Recurrence {
    /// First firing after `first_run_delay`, then every `every`
    Interval {
        every: Duration,
        first_run_delay: Duration,
    },
    /// Every instant matched by the schedule, in local time
    Cron(Box<Schedule>),
}

impl Recurrence {
    /// Interval triggers first fire one full interval after scheduling
    pub fn from_trigger(trigger: &Trigger) -> Self {
        match trigger {
            Trigger::Cron { schedule, .. } => Self::Cron(schedule.clone()),
            Trigger::Interval(every) => Self::Interval {
                every: *every,
                first_run_delay: *every,
            },
        }
    }
}

impl fmt::Debug for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval {
                every,
                first_run_delay,
            } => write!(f, "every {every:?} (first after {first_run_delay:?})"),
            Self::Cron(schedule) => write!(f, "cron '{schedule}'"),
        }
    }
}

/// Handle to a live job inside the engine
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub(crate) cancel: CancellationToken,
}

impl JobHandle {
    /// Stop future firings; a firing already in progress finishes
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// In-memory record of one owner's recurring job
#[derive(Debug, Clone)]
pub struct Job {
    pub owner_id: Uuid,
    pub kind: JobKind,
    pub recurrence: String,
    pub scheduled_at: DateTime<Utc>,
    pub handle: JobHandle,
}

impl Job {
    pub fn engine_job_id(&self) -> Uuid {
        self.handle.job_id
    }
}
