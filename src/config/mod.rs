use anyhow::{Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

/// External process limits and the ffmpeg binary to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// FFmpeg command to use; a full path or a name resolved via $PATH
    #[serde(default = "default_ffmpeg_bin")]
    pub bin: String,

    /// Maximum concurrent recording processes
    #[serde(default = "default_max_record")]
    pub max_record: usize,

    /// Maximum concurrent frame extraction / transcode processes
    #[serde(default = "default_max_frame")]
    pub max_frame: usize,

    /// How long `stop` waits for a killed process to exit
    #[serde(default = "default_stop_timeout", with = "duration_serde::duration")]
    pub stop_timeout: Duration,

    /// Upper bound on a single frame capture
    #[serde(default = "default_frame_timeout", with = "duration_serde::duration")]
    pub frame_timeout: Duration,
}

fn default_ffmpeg_bin() -> String {
    DEFAULT_FFMPEG_BIN.to_string()
}
fn default_max_record() -> usize {
    DEFAULT_MAX_RECORD
}
fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}
fn default_stop_timeout() -> Duration {
    Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS)
}
fn default_frame_timeout() -> Duration {
    Duration::from_secs(DEFAULT_FRAME_TIMEOUT_SECS)
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            bin: default_ffmpeg_bin(),
            max_record: default_max_record(),
            max_frame: default_max_frame(),
            stop_timeout: default_stop_timeout(),
            frame_timeout: default_frame_timeout(),
        }
    }
}

/// Live preview configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// "mediamtx" to delegate to a media server, anything else transcodes with ffmpeg
    #[serde(default = "default_preview_provider")]
    pub provider: String,

    #[serde(default = "default_mediamtx_bin")]
    pub mediamtx_bin: String,

    #[serde(default = "default_max_preview")]
    pub max_preview: usize,

    /// Public URL prefix playback URLs are built from
    #[serde(default = "default_hls_base")]
    pub hls_base: String,

    /// Directory transcoded playlists and segments are written to
    #[serde(default = "default_hls_path")]
    pub hls_path: PathBuf,
}

fn default_preview_provider() -> String {
    DEFAULT_PREVIEW_PROVIDER.to_string()
}
fn default_mediamtx_bin() -> String {
    DEFAULT_MEDIAMTX_BIN.to_string()
}
fn default_max_preview() -> usize {
    DEFAULT_MAX_PREVIEW
}
fn default_hls_base() -> String {
    DEFAULT_HLS_BASE.to_string()
}
fn default_hls_path() -> PathBuf {
    PathBuf::from(DEFAULT_HLS_PATH)
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            provider: default_preview_provider(),
            mediamtx_bin: default_mediamtx_bin(),
            max_preview: default_max_preview(),
            hls_base: default_hls_base(),
            hls_path: default_hls_path(),
        }
    }
}

/// Segment recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    #[serde(default = "default_record_base_path")]
    pub base_path: PathBuf,

    /// Length of each recorded segment in seconds
    #[serde(default = "default_segment_sec")]
    pub segment_sec: u64,
}

fn default_record_base_path() -> PathBuf {
    PathBuf::from(DEFAULT_RECORD_BASE_PATH)
}
fn default_segment_sec() -> u64 {
    DEFAULT_SEGMENT_SECS
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            base_path: default_record_base_path(),
            segment_sec: default_segment_sec(),
        }
    }
}

/// Inference endpoint client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Per-request timeout
    #[serde(default = "default_inference_timeout", with = "duration_serde::duration")]
    pub timeout: Duration,

    /// Extra attempts after the first failure
    #[serde(default = "default_inference_retry")]
    pub retry: u32,

    /// Base delay, multiplied by the attempt number between retries
    #[serde(default = "default_inference_backoff", with = "duration_serde::duration")]
    pub backoff: Duration,
}

fn default_inference_timeout() -> Duration {
    Duration::from_secs(DEFAULT_INFERENCE_TIMEOUT_SECS)
}
fn default_inference_retry() -> u32 {
    DEFAULT_INFERENCE_RETRY
}
fn default_inference_backoff() -> Duration {
    Duration::from_secs(DEFAULT_INFERENCE_BACKOFF_SECS)
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            timeout: default_inference_timeout(),
            retry: default_inference_retry(),
            backoff: default_inference_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Where extracted frames are kept
    #[serde(default = "default_frames_path")]
    pub frames_path: PathBuf,

    /// How long shutdown waits for previews and recordings to stop
    #[serde(default = "default_shutdown_grace", with = "duration_serde::duration")]
    pub shutdown_grace: Duration,
}

fn default_frames_path() -> PathBuf {
    PathBuf::from(DEFAULT_FRAMES_PATH)
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frames_path: default_frames_path(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Optional external media server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaServerConfig {
    /// When set, sources are pulled through `{rtsp_address}/{path_name}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtsp_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub record: RecordConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub media_server: MediaServerConfig,
}

impl Config {
    /// Load from `CONFIG_FILE` (default `config.toml`)
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from_file(&config_file)
    }

    /// Layer defaults, the TOML file and `VISION_SCHEDULER_*` environment overrides.
    ///
    /// A missing file is created with the defaults.
    pub fn load_from_file<P: AsRef<Path>>(config_file: P) -> Result<Self> {
        let path = config_file.as_ref();
        if !path.exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(path, contents)?;
            info!("Created default config file: {}", path.display());
        }

        let config: Config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Replace zero capacities with their defaults
    pub fn normalized(mut self) -> Self {
        if self.ffmpeg.max_record == 0 {
            warn!("ffmpeg.max_record is 0, using {}", DEFAULT_MAX_RECORD);
            self.ffmpeg.max_record = DEFAULT_MAX_RECORD;
        }
        if self.ffmpeg.max_frame == 0 {
            warn!("ffmpeg.max_frame is 0, using {}", DEFAULT_MAX_FRAME);
            self.ffmpeg.max_frame = DEFAULT_MAX_FRAME;
        }
        if self.preview.max_preview == 0 {
            warn!("preview.max_preview is 0, using {}", DEFAULT_MAX_PREVIEW);
            self.preview.max_preview = DEFAULT_MAX_PREVIEW;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ffmpeg.bin.trim().is_empty() {
            bail!("ffmpeg.bin must not be empty");
        }
        if self.preview.mediamtx_bin.trim().is_empty() {
            bail!("preview.mediamtx_bin must not be empty");
        }
        if self.record.segment_sec == 0 {
            bail!("record.segment_sec must be greater than zero");
        }
        Ok(())
    }
}
