//! Centralized error handling for the scheduler
//!
//! Library code returns the typed errors defined in [`types`]; only the binary
//! entry point and configuration loading use `anyhow`.
//!
//! # Error Categories
//!
//! - **Admission errors**: slot pools at capacity
//! - **Process errors**: external media processes that could not be launched
//! - **Configuration errors**: invalid trigger or schedule definitions
//! - **Entity errors**: owners that are disabled or missing when a job fires
//! - **Collaborator errors**: entity store, inference endpoint, workflow engine
//!
//! # Usage
//!
//! ```rust
//! use vision_scheduler::errors::{SchedulerError, SchedulerResult};
//!
//! fn example_function() -> SchedulerResult<u32> {
//!     Err(SchedulerError::invalid_trigger("no schedule or interval specified"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using SchedulerError
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Convenience type alias for entity store Results
pub type StoreResult<T> = Result<T, StoreError>;
