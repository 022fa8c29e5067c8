//! Job scheduling subsystem
//!
//! Persisted trigger configurations become live recurring jobs:
//! - `JobEngine`: one tokio task per job, interval or cron
//! - `JobRegistry`: owner ID to live job, idempotent schedule/unschedule
//! - `BindingScheduler`: algorithm bindings to frame + inference firings
//! - `WorkflowScheduler`: workflow triggers to task creation and dispatch

pub mod binding_scheduler;
pub mod engine;
pub mod registry;
pub mod types;
pub mod workflow_scheduler;

pub use binding_scheduler::{BindingScheduler, BindingSchedulerSettings};
pub use engine::JobEngine;
pub use registry::JobRegistry;
pub use types::*;
pub use workflow_scheduler::{WorkflowDispatcher, WorkflowScheduler};
