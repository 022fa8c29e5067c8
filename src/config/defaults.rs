/// Configuration default values
///
/// All defaults live here so they can be changed in one place.
// FFmpeg defaults
pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
pub const DEFAULT_MAX_RECORD: usize = 4;
pub const DEFAULT_MAX_FRAME: usize = 8;
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_FRAME_TIMEOUT_SECS: u64 = 30;

// Preview defaults
pub const DEFAULT_PREVIEW_PROVIDER: &str = "ffmpeg";
pub const DEFAULT_MEDIAMTX_BIN: &str = "mediamtx";
pub const DEFAULT_MAX_PREVIEW: usize = 10;
pub const DEFAULT_HLS_BASE: &str = "/hls";
pub const DEFAULT_HLS_PATH: &str = "./data/hls";

// Recording defaults
pub const DEFAULT_RECORD_BASE_PATH: &str = "./data/recordings";
pub const DEFAULT_SEGMENT_SECS: u64 = 300;

// Inference defaults
pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INFERENCE_RETRY: u32 = 2;
pub const DEFAULT_INFERENCE_BACKOFF_SECS: u64 = 1;

// Scheduler defaults
pub const DEFAULT_FRAMES_PATH: &str = "./data/frames";
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

// Environment
pub const ENV_PREFIX: &str = "VISION_SCHEDULER_";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
