//! Error type definitions for the scheduler
//!
//! The hierarchy mirrors the collaborators the scheduler talks to: the slot
//! pools and process runtime it owns, plus the entity store, inference
//! endpoint and workflow engine it only consumes.

use thiserror::Error;
use uuid::Uuid;

use crate::services::slot_pool::SlotClass;

/// Top-level scheduler error type
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A slot pool is at capacity; callers should retry later
    #[error("No {class} slot available (capacity {capacity})")]
    SlotExhausted { class: SlotClass, capacity: usize },

    /// The OS refused to spawn an external process
    #[error("Failed to launch '{program}': {message}")]
    ProcessLaunchFailed { program: String, message: String },

    /// A launched process ended without producing what was asked of it
    #[error("Process for {owner} failed: {reason}")]
    ProcessFailed { owner: String, reason: String },

    /// Workflow trigger configuration is neither a cron expression nor an interval
    #[error("Invalid trigger config: {reason}")]
    InvalidTriggerConfig { reason: String },

    /// Binding time window could not be parsed
    #[error("Invalid schedule: {reason}")]
    InvalidSchedule { reason: String },

    /// Owner entity is disabled or no longer exists
    #[error("{entity} {id} is disabled or missing")]
    EntityDisabledOrMissing { entity: &'static str, id: Uuid },

    /// Stop or query on a stream with no registered process
    #[error("Nothing running for stream {stream_id}")]
    NotRunning { stream_id: Uuid },

    /// Start requested for a stream that already has a running process
    #[error("Already running for stream {stream_id}")]
    AlreadyRunning { stream_id: Uuid },

    /// Entity store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Inference endpoint errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Workflow engine errors
    #[error("Workflow engine error: {0}")]
    Engine(#[from] EngineError),

    /// Filesystem errors (output directories, frame files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Entity store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record not found
    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Any other backend failure
    #[error("Backend failure: {message}")]
    Backend { message: String },
}

/// Inference endpoint errors
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("Endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Every attempt failed
    #[error("Inference failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Workflow engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine ran the workflow and it failed
    #[error("Execution failed: {message}")]
    Execution { message: String },

    /// The dispatcher no longer accepts work
    #[error("Workflow dispatcher is shutting down")]
    ShuttingDown,
}

/// Convenience methods for creating common error types
impl SchedulerError {
    /// Create an invalid trigger config error
    pub fn invalid_trigger<S: Into<String>>(reason: S) -> Self {
        Self::InvalidTriggerConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid schedule error
    pub fn invalid_schedule<S: Into<String>>(reason: S) -> Self {
        Self::InvalidSchedule {
            reason: reason.into(),
        }
    }

    /// Create a launch failure for the given program
    pub fn launch_failed<P: Into<String>, M: Into<String>>(program: P, message: M) -> Self {
        Self::ProcessLaunchFailed {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a process failure for the given owner key
    pub fn process_failed<O: Into<String>, R: Into<String>>(owner: O, reason: R) -> Self {
        Self::ProcessFailed {
            owner: owner.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller should treat this as "try again later"
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SlotExhausted { .. })
    }
}

impl StoreError {
    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl EngineError {
    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}
