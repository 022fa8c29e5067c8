//! FFmpeg Command Builder Service
//!
//! Generates argument vectors for the three kinds of media process the
//! scheduler runs, keeping command generation apart from process lifecycle.

use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::services::process_task::ProcessCommand;

/// Builds ffmpeg invocations from a configured binary
#[derive(Debug, Clone)]
pub struct FFmpegCommandBuilder {
    ffmpeg_command: String,
    stop_timeout: Duration,
}

impl FFmpegCommandBuilder {
    pub fn new<S: Into<String>>(ffmpeg_command: S, stop_timeout: Duration) -> Self {
        Self {
            ffmpeg_command: ffmpeg_command.into(),
            stop_timeout,
        }
    }

    pub fn ffmpeg_command(&self) -> &str {
        &self.ffmpeg_command
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Media server process; it reads its own configuration
    pub fn media_server(&self, bin: &str) -> ProcessCommand {
        ProcessCommand::new(bin).stop_timeout(self.stop_timeout)
    }

    fn base(&self) -> ProcessCommand {
        ProcessCommand::new(&self.ffmpeg_command).stop_timeout(self.stop_timeout)
    }

    /// Grab a single JPEG frame from `input_url` into `output`
    pub fn frame_capture(&self, input_url: &str, output: &Path) -> ProcessCommand {
        let mut command = self.base();
        add_input_args(&mut command, input_url);
        let command = command
            .args(["-frames:v", "1", "-q:v", "2", "-y"])
            .arg(output.to_string_lossy());
        debug!("Built frame capture command: {}", command);
        command
    }

    /// Copy `input_url` into timestamped MP4 segments under `output_dir`
    pub fn segment_recording(
        &self,
        input_url: &str,
        output_dir: &Path,
        segment_secs: u64,
    ) -> ProcessCommand {
        let pattern = output_dir.join("%Y%m%d_%H%M%S.mp4");
        let mut command = self.base();
        add_input_args(&mut command, input_url);
        let command = command
            .args(["-c", "copy", "-f", "segment", "-segment_time"])
            .arg(segment_secs.to_string())
            .args(["-reset_timestamps", "1", "-strftime", "1"])
            .arg(pattern.to_string_lossy());
        debug!("Built segment recording command: {}", command);
        command
    }

    /// Transcode `input_url` into a rolling HLS playlist under `output_dir`
    pub fn hls_preview(&self, input_url: &str, output_dir: &Path) -> ProcessCommand {
        let segments = output_dir.join("segment_%03d.ts");
        let playlist = output_dir.join("index.m3u8");
        let mut command = self.base();
        add_input_args(&mut command, input_url);
        let command = command
            .args(["-c:v", "libx264", "-c:a", "aac"])
            .args(["-f", "hls", "-hls_time", "2", "-hls_list_size", "3"])
            .args(["-hls_flags", "delete_segments", "-hls_segment_filename"])
            .arg(segments.to_string_lossy())
            .arg(playlist.to_string_lossy());
        debug!("Built HLS preview command: {}", command);
        command
    }
}

fn add_input_args(command: &mut ProcessCommand, input_url: &str) {
    if input_url.starts_with("rtsp://") || input_url.starts_with("rtsps://") {
        command.args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
    }
    command.args.extend(["-i".to_string(), input_url.to_string()]);
}
