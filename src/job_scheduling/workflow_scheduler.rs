//! Workflow Scheduler
//!
//! Creates a task for each firing of a scheduled workflow and hands it to
//! the workflow engine, plus on-demand triggering.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::engine::JobEngine;
use super::registry::JobRegistry;
use super::types::{JobCallback, JobKind, Recurrence};
use crate::errors::{EngineError, SchedulerError, SchedulerResult};
use crate::models::{Task, Trigger, TriggerType, Workflow};
use crate::observability::{FiringOutcome, SchedulerMetrics};
use crate::repositories::EntityStore;
use crate::services::workflow_engine::WorkflowEngine;

/// Runs workflow executions in the background and records failures
pub struct WorkflowDispatcher {
    engine: Arc<dyn WorkflowEngine>,
    store: Arc<dyn EntityStore>,
    tracker: TaskTracker,
    closed: CancellationToken,
    metrics: SchedulerMetrics,
}

impl WorkflowDispatcher {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        store: Arc<dyn EntityStore>,
        metrics: SchedulerMetrics,
    ) -> Self {
        Self {
            engine,
            store,
            tracker: TaskTracker::new(),
            closed: CancellationToken::new(),
            metrics,
        }
    }

    /// Hand `task` to the engine without waiting for it.
    ///
    /// Fails synchronously only when the dispatcher is shut down. An error or
    /// panic inside the engine marks the task failed.
    pub fn dispatch(&self, workflow: Workflow, task: Task) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let engine = self.engine.clone();
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        self.metrics.record_task_dispatched();

        self.tracker.spawn(async move {
            let task_id = task.id;
            let execution = {
                let task = task.clone();
                tokio::spawn(async move { engine.execute(&workflow, &task).await })
            };

            let failure = match execution.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) if e.is_panic() => Some("workflow engine panicked".to_string()),
                Err(e) => Some(format!("workflow execution aborted: {e}")),
            };

            if let Some(reason) = failure {
                warn!("Task {} failed: {}", task_id, reason);
                metrics.record_task_failed();
                let mut latest = store.get_task(task_id).await.unwrap_or(task);
                latest.mark_failed(reason);
                if let Err(e) = store.update_task(&latest).await {
                    error!("Failed to record failure of task {}: {}", task_id, e);
                }
            } else {
                debug!("Task {} finished", task_id);
            }
        });
        Ok(())
    }

    /// Refuse new work and wait up to `grace` for running executions
    pub async fn shutdown(&self, grace: Duration) {
        self.closed.cancel();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!("{} workflow execution(s) still running after {:?}", self.tracker.len(), grace);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.is_cancelled()
    }
}

pub struct WorkflowScheduler {
    store: Arc<dyn EntityStore>,
    dispatcher: WorkflowDispatcher,
    registry: JobRegistry,
    metrics: SchedulerMetrics,
    shutdown_grace: Duration,
}

impl WorkflowScheduler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        workflow_engine: Arc<dyn WorkflowEngine>,
        engine: Arc<JobEngine>,
        metrics: SchedulerMetrics,
        shutdown_grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: WorkflowDispatcher::new(workflow_engine, store.clone(), metrics.clone()),
            store,
            registry: JobRegistry::new(JobKind::Workflow, engine),
            metrics,
            shutdown_grace,
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &WorkflowDispatcher {
        &self.dispatcher
    }

    /// Schedule every enabled workflow with a `schedule` trigger
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<usize> {
        info!("Starting workflow scheduler");
        let workflows = self.store.list_enabled_workflows().await?;
        let mut scheduled = 0;

        for workflow in workflows
            .iter()
            .filter(|w| w.trigger_type == TriggerType::Schedule)
        {
            match self.schedule_workflow(workflow).await {
                Ok(()) => scheduled += 1,
                Err(e) => warn!(
                    "Failed to schedule workflow '{}' ({}): {}",
                    workflow.name, workflow.id, e
                ),
            }
        }

        info!("Workflow scheduler started with {} job(s)", scheduled);
        Ok(scheduled)
    }

    pub async fn stop(&self) {
        let removed = self.registry.clear().await;
        info!("Workflow scheduler stopping, {} job(s) unscheduled", removed);
        self.registry.engine().shutdown(self.shutdown_grace).await;
        self.dispatcher.shutdown(self.shutdown_grace).await;
    }

    /// Register the workflow's trigger as a recurring job; a no-op if one exists
    pub async fn schedule_workflow(self: &Arc<Self>, workflow: &Workflow) -> SchedulerResult<()> {
        if self.registry.is_scheduled(workflow.id).await {
            debug!("Workflow {} already scheduled, skipping", workflow.id);
            return Ok(());
        }

        let trigger = Trigger::from_config(workflow.trigger_conf.as_ref())?;
        let recurrence = Recurrence::from_trigger(&trigger);

        if self
            .registry
            .schedule(workflow.id, recurrence.clone(), self.firing_callback())
            .await?
        {
            info!(
                "Scheduled workflow '{}' ({}) {:?}",
                workflow.name, workflow.id, recurrence
            );
        }
        Ok(())
    }

    pub async fn unschedule_workflow(&self, workflow_id: Uuid) {
        if self.registry.unschedule(workflow_id).await {
            info!("Unscheduled workflow {}", workflow_id);
        }
    }

    fn firing_callback(self: &Arc<Self>) -> JobCallback {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |workflow_id| {
            let scheduler = scheduler.clone();
            Box::pin(async move {
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.run_workflow(workflow_id).await;
                }
            })
        })
    }

    /// One firing: create a pending task and dispatch it
    pub async fn run_workflow(&self, workflow_id: Uuid) -> FiringOutcome {
        let outcome = match self.try_run(workflow_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Workflow {} firing failed: {}", workflow_id, e);
                FiringOutcome::Failed
            }
        };
        self.metrics.record_firing(JobKind::Workflow, outcome);
        outcome
    }

    async fn try_run(&self, workflow_id: Uuid) -> SchedulerResult<FiringOutcome> {
        let workflow = match self.store.get_workflow(workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) if e.is_not_found() => {
                info!("Workflow {} no longer exists, unscheduling", workflow_id);
                self.unschedule_workflow(workflow_id).await;
                return Ok(FiringOutcome::Unscheduled);
            }
            Err(e) => return Err(e.into()),
        };
        if !workflow.is_enabled() {
            info!(
                "Workflow '{}' ({}) is {}, unscheduling",
                workflow.name, workflow_id, workflow.status
            );
            self.unschedule_workflow(workflow_id).await;
            return Ok(FiringOutcome::Unscheduled);
        }

        let task = self.create_and_dispatch(workflow, None).await?;
        Ok(if task.status.is_terminal() {
            FiringOutcome::Failed
        } else {
            FiringOutcome::Completed
        })
    }

    /// Run a workflow now, returning its freshly created task immediately
    pub async fn trigger_workflow(&self, workflow_id: Uuid, asset_id: Option<Uuid>) -> SchedulerResult<Task> {
        let workflow = match self.store.get_workflow(workflow_id).await {
            Ok(workflow) if workflow.is_enabled() => workflow,
            Ok(_) => {
                return Err(SchedulerError::EntityDisabledOrMissing {
                    entity: "workflow",
                    id: workflow_id,
                });
            }
            Err(e) if e.is_not_found() => {
                return Err(SchedulerError::EntityDisabledOrMissing {
                    entity: "workflow",
                    id: workflow_id,
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!("Manually triggering workflow '{}' ({})", workflow.name, workflow_id);
        self.create_and_dispatch(workflow, asset_id).await
    }

    async fn create_and_dispatch(&self, workflow: Workflow, asset_id: Option<Uuid>) -> SchedulerResult<Task> {
        let mut task = Task::pending(workflow.id, asset_id);
        self.store.create_task(&task).await?;
        debug!("Created task {} for workflow {}", task.id, workflow.id);

        if let Err(e) = self.dispatcher.dispatch(workflow, task.clone()) {
            warn!("Could not dispatch task {}: {}", task.id, e);
            self.metrics.record_task_failed();
            task.mark_failed(e.to_string());
            self.store.update_task(&task).await?;
        }
        Ok(task)
    }
}
