//! Record Manager
//!
//! At most one segment recording per stream, each on a record slot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RecordConfig;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::services::media_processes::MediaProcessManager;
use crate::services::process_task::ProcessTask;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecordingHandle {
    pub stream_id: Uuid,
    pub task_id: Uuid,
    pub output_dir: PathBuf,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

struct RecordingEntry {
    handle: RecordingHandle,
    task: Arc<ProcessTask>,
}

pub struct RecordManager {
    media: MediaProcessManager,
    base_path: PathBuf,
    segment_secs: u64,
    recordings: Arc<RwLock<HashMap<Uuid, RecordingEntry>>>,
    start_lock: Mutex<()>,
    root: CancellationToken,
}

impl RecordManager {
    pub fn new(media: MediaProcessManager, config: &RecordConfig) -> Self {
        Self {
            media,
            base_path: config.base_path.clone(),
            segment_secs: config.segment_sec,
            recordings: Arc::new(RwLock::new(HashMap::new())),
            start_lock: Mutex::new(()),
            root: CancellationToken::new(),
        }
    }

    /// Start recording `source_url` into `{base_path}/{stream_id}/`
    pub async fn start_recording(&self, stream_id: Uuid, source_url: &str) -> SchedulerResult<RecordingHandle> {
        let _guard = self.start_lock.lock().await;

        {
            let mut recordings = self.recordings.write().await;
            match recordings.get(&stream_id) {
                Some(entry) if entry.task.is_running() => {
                    return Err(SchedulerError::AlreadyRunning { stream_id });
                }
                Some(_) => {
                    recordings.remove(&stream_id);
                }
                None => {}
            }
        }

        let output_dir = self.base_path.join(stream_id.to_string());
        let task = self.media.start_recording(
            &self.root,
            stream_id,
            source_url,
            &output_dir,
            self.segment_secs,
        )?;

        let handle = RecordingHandle {
            stream_id,
            task_id: task.id(),
            output_dir,
            pid: task.pid(),
            started_at: task.started_at(),
        };
        self.recordings.write().await.insert(
            stream_id,
            RecordingEntry {
                handle: handle.clone(),
                task: task.clone(),
            },
        );
        self.supervise(stream_id, task);

        info!(
            "Started recording stream {} into {}",
            stream_id,
            handle.output_dir.display()
        );
        Ok(handle)
    }

    fn supervise(&self, stream_id: Uuid, task: Arc<ProcessTask>) {
        let recordings = self.recordings.clone();
        tokio::spawn(async move {
            let outcome = task.wait().await;
            let mut recordings = recordings.write().await;
            if recordings
                .get(&stream_id)
                .is_some_and(|entry| entry.task.id() == task.id())
            {
                recordings.remove(&stream_id);
                warn!("Recording for stream {} ended: {}", stream_id, outcome);
            }
        });
    }

    pub async fn stop_recording(&self, stream_id: Uuid) -> SchedulerResult<()> {
        let entry = self
            .recordings
            .write()
            .await
            .remove(&stream_id)
            .ok_or(SchedulerError::NotRunning { stream_id })?;

        if entry.task.stop().await.is_none() {
            warn!("Recording process for stream {} did not exit in time", stream_id);
        }
        info!("Stopped recording stream {}", stream_id);
        Ok(())
    }

    pub async fn is_recording(&self, stream_id: Uuid) -> bool {
        self.recordings
            .read()
            .await
            .get(&stream_id)
            .is_some_and(|entry| entry.task.is_running())
    }

    pub async fn list_recordings(&self) -> Vec<RecordingHandle> {
        self.recordings
            .read()
            .await
            .values()
            .filter(|entry| entry.task.is_running())
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub async fn stop_all(&self) {
        let entries: Vec<RecordingEntry> =
            self.recordings.write().await.drain().map(|(_, e)| e).collect();
        if entries.is_empty() {
            return;
        }
        info!("Stopping {} recording(s)", entries.len());
        futures::future::join_all(entries.iter().map(|entry| entry.task.stop())).await;
    }
}
