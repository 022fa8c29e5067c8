#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use vision_scheduler::models::{Algorithm, AlgorithmBinding, Stream, TriggerType, Workflow, WorkflowStatus};
use vision_scheduler::observability::SchedulerMetrics;
use vision_scheduler::services::{FFmpegCommandBuilder, MediaProcessManager, SlotPool, SlotPools};

/// Write an executable shell script into `dir`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Fake ffmpeg that writes `contents` to its last argument
#[cfg(unix)]
pub fn fake_frame_ffmpeg(dir: &Path, contents: &str) -> PathBuf {
    write_script(
        dir,
        "fake-ffmpeg",
        &format!("for last; do :; done\nprintf '%s' '{contents}' > \"$last\""),
    )
}

/// Fake ffmpeg that just stays alive
#[cfg(unix)]
pub fn long_running_ffmpeg(dir: &Path) -> PathBuf {
    write_script(dir, "slow-ffmpeg", "exec sleep 30")
}

pub fn pools(record: usize, frame: usize, preview: usize) -> SlotPools {
    SlotPools::new(record, frame, preview, SchedulerMetrics::noop())
}

pub fn media(ffmpeg: &Path, pools: SlotPools) -> MediaProcessManager {
    MediaProcessManager::new(
        pools,
        FFmpegCommandBuilder::new(ffmpeg.to_string_lossy(), Duration::from_secs(2)),
        Duration::from_secs(5),
    )
}

/// Poll until the pool reaches `expected` slots in use
pub async fn wait_for_in_use(pool: &SlotPool, expected: usize) {
    for _ in 0..200 {
        if pool.in_use() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.in_use(), expected, "{} pool did not settle", pool.class());
}

pub fn stream(name: &str) -> Stream {
    Stream {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: format!("rtsp://cameras.local/{}", name.to_lowercase()),
        enabled: true,
    }
}

pub fn algorithm(endpoint: &str) -> Algorithm {
    Algorithm {
        id: Uuid::new_v4(),
        name: "detector".to_string(),
        endpoint: endpoint.to_string(),
        input_spec: Some(serde_json::json!({ "threshold": 0.4 })),
    }
}

pub fn binding(stream: &Stream, algorithm: &Algorithm, interval_sec: u64) -> AlgorithmBinding {
    AlgorithmBinding {
        id: Uuid::new_v4(),
        stream_id: stream.id,
        algorithm_id: algorithm.id,
        enabled: true,
        interval_sec,
        initial_delay_sec: 0,
        schedule: None,
        config: None,
    }
}

pub fn workflow(trigger_type: TriggerType, trigger_conf: Option<serde_json::Value>) -> Workflow {
    Workflow {
        id: Uuid::new_v4(),
        name: "analysis".to_string(),
        status: WorkflowStatus::Enabled,
        trigger_type,
        trigger_conf,
    }
}
