//! Entity store trait definition

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::models::{Algorithm, AlgorithmBinding, InferenceResult, Stream, Task, Workflow};
use uuid::Uuid;

/// Persistence port used by the schedulers
///
/// `get_*` methods return [`StoreError::NotFound`](crate::errors::StoreError::NotFound)
/// when the record does not exist so callers can tell "gone" apart from a
/// backend failure.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_stream(&self, id: Uuid) -> StoreResult<Stream>;

    async fn list_streams(&self) -> StoreResult<Vec<Stream>>;

    async fn get_binding(&self, id: Uuid) -> StoreResult<AlgorithmBinding>;

    async fn list_bindings_by_stream(&self, stream_id: Uuid) -> StoreResult<Vec<AlgorithmBinding>>;

    async fn get_algorithm(&self, id: Uuid) -> StoreResult<Algorithm>;

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow>;

    /// Workflows whose status is `enabled`
    async fn list_enabled_workflows(&self) -> StoreResult<Vec<Workflow>>;

    async fn create_task(&self, task: &Task) -> StoreResult<()>;

    async fn update_task(&self, task: &Task) -> StoreResult<()>;

    async fn get_task(&self, id: Uuid) -> StoreResult<Task>;

    async fn create_result(&self, result: &InferenceResult) -> StoreResult<()>;
}
