//! Workflow engine port
//!
//! The scheduler hands tasks to an engine and only cares whether execution
//! failed. [`LoggingWorkflowEngine`] is the built-in engine used by the
//! binary: it walks the task through running to success.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::errors::EngineError;
use crate::models::{Task, Workflow};
use crate::repositories::EntityStore;

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn execute(&self, workflow: &Workflow, task: &Task) -> Result<(), EngineError>;
}

pub struct LoggingWorkflowEngine {
    store: Arc<dyn EntityStore>,
}

impl LoggingWorkflowEngine {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorkflowEngine for LoggingWorkflowEngine {
    async fn execute(&self, workflow: &Workflow, task: &Task) -> Result<(), EngineError> {
        let mut task = task.clone();

        task.mark_running();
        self.store
            .update_task(&task)
            .await
            .map_err(|e| EngineError::execution(e.to_string()))?;
        info!(
            "Executing workflow '{}' ({}) as task {}",
            workflow.name, workflow.id, task.id
        );

        task.mark_success();
        self.store
            .update_task(&task)
            .await
            .map_err(|e| EngineError::execution(e.to_string()))?;
        info!("Task {} for workflow '{}' completed", task.id, workflow.name);
        Ok(())
    }
}
