//! Preview Manager
//!
//! Keeps at most one live preview process per stream. Previews are started
//! on demand and either delegate to a media server or transcode to HLS
//! with ffmpeg.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PreviewConfig;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::services::media_processes::MediaProcessManager;
use crate::services::process_task::ProcessTask;
use crate::services::slot_pool::SlotPermit;

const MEDIA_SERVER_PROVIDER: &str = "mediamtx";

/// How previews are produced, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewStrategy {
    /// Run the media server binary; it serves `{hls_base}/{stream_id}`
    MediaServer { bin: String, hls_base: String },
    /// Transcode with ffmpeg into `{hls_dir}/{stream_id}/index.m3u8`
    Transcode { hls_base: String, hls_dir: PathBuf },
}

impl PreviewStrategy {
    /// Unknown providers fall back to transcoding
    pub fn from_config(config: &PreviewConfig) -> Self {
        match config.provider.trim().to_lowercase().as_str() {
            MEDIA_SERVER_PROVIDER => Self::MediaServer {
                bin: config.mediamtx_bin.clone(),
                hls_base: config.hls_base.clone(),
            },
            "ffmpeg" => Self::transcode(config),
            other => {
                warn!("Unknown preview provider '{}', falling back to ffmpeg", other);
                Self::transcode(config)
            }
        }
    }

    fn transcode(config: &PreviewConfig) -> Self {
        Self::Transcode {
            hls_base: config.hls_base.clone(),
            hls_dir: config.hls_path.clone(),
        }
    }

    pub fn playback_url(&self, stream_id: Uuid) -> String {
        match self {
            Self::MediaServer { hls_base, .. } => {
                format!("{}/{}", hls_base.trim_end_matches('/'), stream_id)
            }
            Self::Transcode { hls_base, .. } => {
                format!("{}/{}/index.m3u8", hls_base.trim_end_matches('/'), stream_id)
            }
        }
    }
}

/// What callers get back for a live preview
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PreviewHandle {
    pub stream_id: Uuid,
    pub task_id: Uuid,
    pub source_url: String,
    pub playback_url: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

struct PreviewEntry {
    handle: PreviewHandle,
    task: Arc<ProcessTask>,
    scope: CancellationToken,
    /// Preview slot held alongside a transcode's frame slot
    extra_permit: Option<SlotPermit>,
}

impl PreviewEntry {
    fn release(&self) {
        if let Some(permit) = &self.extra_permit {
            permit.release();
        }
        self.scope.cancel();
    }
}

pub struct PreviewManager {
    strategy: PreviewStrategy,
    media: MediaProcessManager,
    previews: Arc<RwLock<HashMap<Uuid, PreviewEntry>>>,
    start_lock: Mutex<()>,
    root: CancellationToken,
}

impl PreviewManager {
    pub fn new(strategy: PreviewStrategy, media: MediaProcessManager) -> Self {
        info!("Preview manager using {:?}", strategy);
        Self {
            strategy,
            media,
            previews: Arc::new(RwLock::new(HashMap::new())),
            start_lock: Mutex::new(()),
            root: CancellationToken::new(),
        }
    }

    pub fn strategy(&self) -> &PreviewStrategy {
        &self.strategy
    }

    /// Return the running preview for `stream_id`, starting one if needed.
    ///
    /// Concurrent calls for the same stream spawn a single process and all
    /// receive the same handle.
    pub async fn start_preview(&self, stream_id: Uuid, source_url: &str) -> SchedulerResult<PreviewHandle> {
        let _guard = self.start_lock.lock().await;

        {
            let previews = self.previews.read().await;
            if let Some(entry) = previews.get(&stream_id)
                && entry.task.is_running()
            {
                debug!("Preview for stream {} already running", stream_id);
                return Ok(entry.handle.clone());
            }
        }

        // Anything still registered here has exited; its supervisor may not have run yet
        if let Some(stale) = self.previews.write().await.remove(&stream_id) {
            stale.release();
        }

        let scope = self.root.child_token();
        let pools = self.media.pools();
        let owner_key = format!("preview:{stream_id}");

        let (task, extra_permit) = match &self.strategy {
            PreviewStrategy::MediaServer { bin, .. } => {
                let command = self.media.builder().media_server(bin);
                let task = ProcessTask::spawn(&pools.preview, &scope, owner_key, command, None)?;
                (task, None)
            }
            PreviewStrategy::Transcode { hls_dir, .. } => {
                let preview_permit = pools.preview.acquire(&scope)?;
                let output_dir = hls_dir.join(stream_id.to_string());
                let command = self.media.builder().hls_preview(source_url, &output_dir);
                let task = match ProcessTask::spawn(
                    &pools.frame,
                    &scope,
                    owner_key,
                    command,
                    Some(&output_dir),
                ) {
                    Ok(task) => task,
                    Err(e) => {
                        preview_permit.release();
                        scope.cancel();
                        return Err(e);
                    }
                };
                (task, Some(preview_permit))
            }
        };

        let handle = PreviewHandle {
            stream_id,
            task_id: task.id(),
            source_url: source_url.to_string(),
            playback_url: self.strategy.playback_url(stream_id),
            pid: task.pid(),
            started_at: task.started_at(),
        };

        self.previews.write().await.insert(
            stream_id,
            PreviewEntry {
                handle: handle.clone(),
                task: task.clone(),
                scope,
                extra_permit,
            },
        );
        self.supervise(stream_id, task);

        info!(
            "Started preview for stream {} at {}",
            stream_id, handle.playback_url
        );
        Ok(handle)
    }

    /// Drop the registry entry once the process exits by itself, unless a
    /// newer preview has replaced it in the meantime.
    fn supervise(&self, stream_id: Uuid, task: Arc<ProcessTask>) {
        let previews = self.previews.clone();
        tokio::spawn(async move {
            let outcome = task.wait().await;
            let mut previews = previews.write().await;
            if previews
                .get(&stream_id)
                .is_some_and(|entry| entry.task.id() == task.id())
                && let Some(entry) = previews.remove(&stream_id)
            {
                entry.release();
                info!("Preview for stream {} ended: {}", stream_id, outcome);
            }
        });
    }

    /// Stop the preview for `stream_id`; the entry is removed even if the
    /// process does not exit within the stop timeout.
    pub async fn stop_preview(&self, stream_id: Uuid) -> SchedulerResult<()> {
        let entry = self
            .previews
            .write()
            .await
            .remove(&stream_id)
            .ok_or(SchedulerError::NotRunning { stream_id })?;

        entry.release();
        if entry.task.stop().await.is_none() {
            warn!("Preview process for stream {} did not exit in time", stream_id);
        }
        info!("Stopped preview for stream {}", stream_id);
        Ok(())
    }

    pub async fn get_preview(&self, stream_id: Uuid) -> Option<PreviewHandle> {
        self.previews
            .read()
            .await
            .get(&stream_id)
            .filter(|entry| entry.task.is_running())
            .map(|entry| entry.handle.clone())
    }

    pub async fn list_previews(&self) -> Vec<PreviewHandle> {
        self.previews
            .read()
            .await
            .values()
            .filter(|entry| entry.task.is_running())
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Stop every preview; used on shutdown
    pub async fn stop_all(&self) {
        let entries: Vec<PreviewEntry> = self.previews.write().await.drain().map(|(_, e)| e).collect();
        if entries.is_empty() {
            return;
        }
        info!("Stopping {} preview(s)", entries.len());
        for entry in &entries {
            entry.release();
        }
        futures::future::join_all(entries.iter().map(|entry| entry.task.stop())).await;
    }
}
