use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod schedule;
pub mod trigger;

pub use schedule::BindingSchedule;
pub use trigger::Trigger;

/// A live or recorded video source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stream {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Stream {
    /// Media-server path derived from the stream name ("Front Door" -> "front_door")
    pub fn path_name(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }
}

/// An inference model reachable over HTTP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Algorithm {
    pub id: Uuid,
    pub name: String,
    pub endpoint: String,
    /// Extra request fields merged into every inference request
    #[serde(default)]
    pub input_spec: Option<serde_json::Value>,
}

/// Periodic invocation of an algorithm against a stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmBinding {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub algorithm_id: Uuid,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub interval_sec: u64,
    #[serde(default)]
    pub initial_delay_sec: u64,
    /// Optional time window, see [`BindingSchedule`]
    #[serde(default)]
    pub schedule: Option<serde_json::Value>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkflowStatus {
    Enabled,
    Disabled,
    Draft,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Event,
    AssetNew,
    AssetDone,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub trigger_type: TriggerType,
    /// Persisted trigger configuration, parsed by [`Trigger::from_config`]
    #[serde(default)]
    pub trigger_conf: Option<serde_json::Value>,
}

impl Workflow {
    pub fn is_enabled(&self) -> bool {
        self.status == WorkflowStatus::Enabled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// One execution attempt of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub status: TaskStatus,
    pub progress: u8,
    pub input_params: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// New pending task; the asset, if any, is also recorded in `input_params`
    pub fn pending(workflow_id: Uuid, asset_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            asset_id,
            status: TaskStatus::Pending,
            progress: 0,
            input_params: asset_id.map(|id| serde_json::json!({ "asset_id": id.to_string() })),
            error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_success(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Success;
        self.progress = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed<S: Into<String>>(&mut self, error: S) {
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

/// Output of one inference call against one frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceResult {
    pub id: Uuid,
    pub binding_id: Uuid,
    pub stream_id: Uuid,
    pub ts: DateTime<Utc>,
    /// Path of the frame the inference ran on
    pub frame_ref: String,
    pub output: serde_json::Value,
    pub latency_ms: u64,
}

fn default_true() -> bool {
    true
}
