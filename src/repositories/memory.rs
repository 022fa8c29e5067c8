//! In-memory entity store, seeded from a JSON fixture

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::traits::EntityStore;
use crate::errors::{SchedulerResult, StoreError, StoreResult};
use crate::models::{Algorithm, AlgorithmBinding, InferenceResult, Stream, Task, Workflow};

/// Fixture format accepted by [`InMemoryStore::from_json_file`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default)]
    pub algorithms: Vec<Algorithm>,
    #[serde(default)]
    pub bindings: Vec<AlgorithmBinding>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

#[derive(Default)]
struct Tables {
    streams: HashMap<Uuid, Stream>,
    algorithms: HashMap<Uuid, Algorithm>,
    bindings: HashMap<Uuid, AlgorithmBinding>,
    workflows: HashMap<Uuid, Workflow>,
    tasks: HashMap<Uuid, Task>,
    results: Vec<InferenceResult>,
}

/// Seedable stand-in for a real database.
///
/// Nothing is ever evicted: tasks and inference results accumulate for the
/// life of the process.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: StoreSeed) -> Self {
        let tables = Tables {
            streams: seed.streams.into_iter().map(|s| (s.id, s)).collect(),
            algorithms: seed.algorithms.into_iter().map(|a| (a.id, a)).collect(),
            bindings: seed.bindings.into_iter().map(|b| (b.id, b)).collect(),
            workflows: seed.workflows.into_iter().map(|w| (w.id, w)).collect(),
            ..Default::default()
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn from_json_file<P: AsRef<Path>>(path: P) -> SchedulerResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let seed: StoreSeed = serde_json::from_str(&contents)?;
        info!(
            "Loaded seed {} ({} streams, {} bindings, {} workflows)",
            path.display(),
            seed.streams.len(),
            seed.bindings.len(),
            seed.workflows.len()
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn upsert_stream(&self, stream: Stream) {
        self.tables.write().await.streams.insert(stream.id, stream);
    }

    pub async fn upsert_algorithm(&self, algorithm: Algorithm) {
        self.tables
            .write()
            .await
            .algorithms
            .insert(algorithm.id, algorithm);
    }

    pub async fn upsert_binding(&self, binding: AlgorithmBinding) {
        self.tables.write().await.bindings.insert(binding.id, binding);
    }

    pub async fn remove_binding(&self, id: Uuid) -> Option<AlgorithmBinding> {
        self.tables.write().await.bindings.remove(&id)
    }

    pub async fn upsert_workflow(&self, workflow: Workflow) {
        self.tables
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow);
    }

    pub async fn remove_workflow(&self, id: Uuid) -> Option<Workflow> {
        self.tables.write().await.workflows.remove(&id)
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.tables.read().await.tasks.values().cloned().collect()
    }

    pub async fn results(&self) -> Vec<InferenceResult> {
        self.tables.read().await.results.clone()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get_stream(&self, id: Uuid) -> StoreResult<Stream> {
        self.tables
            .read()
            .await
            .streams
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("stream", id))
    }

    async fn list_streams(&self) -> StoreResult<Vec<Stream>> {
        Ok(self.tables.read().await.streams.values().cloned().collect())
    }

    async fn get_binding(&self, id: Uuid) -> StoreResult<AlgorithmBinding> {
        self.tables
            .read()
            .await
            .bindings
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("binding", id))
    }

    async fn list_bindings_by_stream(&self, stream_id: Uuid) -> StoreResult<Vec<AlgorithmBinding>> {
        Ok(self
            .tables
            .read()
            .await
            .bindings
            .values()
            .filter(|b| b.stream_id == stream_id)
            .cloned()
            .collect())
    }

    async fn get_algorithm(&self, id: Uuid) -> StoreResult<Algorithm> {
        self.tables
            .read()
            .await
            .algorithms
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("algorithm", id))
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow> {
        self.tables
            .read()
            .await
            .workflows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("workflow", id))
    }

    async fn list_enabled_workflows(&self) -> StoreResult<Vec<Workflow>> {
        Ok(self
            .tables
            .read()
            .await
            .workflows
            .values()
            .filter(|w| w.is_enabled())
            .cloned()
            .collect())
    }

    async fn create_task(&self, task: &Task) -> StoreResult<()> {
        self.tables.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("task", task.id)),
        }
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Task> {
        self.tables
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("task", id))
    }

    async fn create_result(&self, result: &InferenceResult) -> StoreResult<()> {
        self.tables.write().await.results.push(result.clone());
        Ok(())
    }
}
