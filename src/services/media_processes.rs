//! Media process manager
//!
//! Frame capture (one-shot) and segment recording (long running) on top of
//! [`ProcessTask`], each drawing from its own slot pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::services::ffmpeg_command_builder::FFmpegCommandBuilder;
use crate::services::process_task::ProcessTask;
use crate::services::slot_pool::SlotPools;

#[derive(Debug, Clone)]
pub struct MediaProcessManager {
    pools: SlotPools,
    builder: FFmpegCommandBuilder,
    frame_timeout: Duration,
}

impl MediaProcessManager {
    pub fn new(pools: SlotPools, builder: FFmpegCommandBuilder, frame_timeout: Duration) -> Self {
        Self {
            pools,
            builder,
            frame_timeout,
        }
    }

    pub fn from_config(config: &Config, pools: SlotPools) -> Self {
        Self::new(
            pools,
            FFmpegCommandBuilder::new(&config.ffmpeg.bin, config.ffmpeg.stop_timeout),
            config.ffmpeg.frame_timeout,
        )
    }

    pub fn pools(&self) -> &SlotPools {
        &self.pools
    }

    pub fn builder(&self) -> &FFmpegCommandBuilder {
        &self.builder
    }

    /// Capture one frame of `source_url` into `output` on a frame slot.
    ///
    /// The slot is held only while the capture runs.
    pub async fn extract_frame(
        &self,
        scope: &CancellationToken,
        stream_id: Uuid,
        source_url: &str,
        output: &Path,
    ) -> SchedulerResult<()> {
        let owner_key = format!("frame:{stream_id}");
        let command = self.builder.frame_capture(source_url, output);
        let task = ProcessTask::spawn(
            &self.pools.frame,
            scope,
            owner_key.clone(),
            command,
            output.parent(),
        )?;

        let outcome = match tokio::time::timeout(self.frame_timeout, task.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "stream_id={} status=frame_timeout timeout={:?}",
                    stream_id, self.frame_timeout
                );
                task.stop().await;
                return Err(SchedulerError::process_failed(
                    owner_key,
                    format!("frame capture exceeded {:?}", self.frame_timeout),
                ));
            }
        };

        if !outcome.is_success() {
            return Err(SchedulerError::process_failed(owner_key, outcome.to_string()));
        }
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(SchedulerError::process_failed(
                owner_key,
                format!("no frame written to {}", output.display()),
            ));
        }

        debug!("stream_id={} frame={} status=captured", stream_id, output.display());
        Ok(())
    }

    /// Start a segment recording of `source_url` into `output_dir` on a record slot
    pub fn start_recording(
        &self,
        scope: &CancellationToken,
        stream_id: Uuid,
        source_url: &str,
        output_dir: &Path,
        segment_secs: u64,
    ) -> SchedulerResult<Arc<ProcessTask>> {
        let command = self
            .builder
            .segment_recording(source_url, output_dir, segment_secs);
        ProcessTask::spawn(
            &self.pools.record,
            scope,
            format!("record:{stream_id}"),
            command,
            Some(output_dir),
        )
    }

    /// Frame output path for one capture of a stream
    pub fn frame_path(frames_root: &Path, stream_id: Uuid) -> PathBuf {
        frames_root
            .join(stream_id.to_string())
            .join(format!("frame_{}.jpg", Uuid::new_v4()))
    }
}
