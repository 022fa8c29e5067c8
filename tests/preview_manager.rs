#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use vision_scheduler::config::RecordConfig;
use vision_scheduler::errors::SchedulerError;
use vision_scheduler::services::{MediaProcessManager, PreviewManager, PreviewStrategy, RecordManager};

fn transcode(dir: &TempDir) -> PreviewStrategy {
    PreviewStrategy::Transcode {
        hls_base: "http://localhost:8080/hls".to_string(),
        hls_dir: dir.path().join("hls"),
    }
}

fn slow_media(dir: &TempDir, frame: usize, preview: usize) -> MediaProcessManager {
    let ffmpeg = common::long_running_ffmpeg(dir.path());
    common::media(&ffmpeg, common::pools(1, frame, preview))
}

#[tokio::test]
async fn test_concurrent_starts_share_one_preview() {
    let dir = TempDir::new().unwrap();
    let media = slow_media(&dir, 2, 2);
    let manager = Arc::new(PreviewManager::new(transcode(&dir), media.clone()));
    let stream_id = Uuid::new_v4();

    let (a, b) = tokio::join!(
        manager.start_preview(stream_id, "rtsp://cam/1"),
        manager.start_preview(stream_id, "rtsp://cam/1"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a, b);
    assert_eq!(a.playback_url, format!("http://localhost:8080/hls/{stream_id}/index.m3u8"));
    assert!(dir.path().join("hls").join(stream_id.to_string()).is_dir());
    assert_eq!(media.pools().preview.in_use(), 1);
    assert_eq!(media.pools().frame.in_use(), 1);
    assert_eq!(manager.list_previews().await.len(), 1);
    assert_eq!(manager.get_preview(stream_id).await, Some(a));

    manager.stop_preview(stream_id).await.unwrap();
    common::wait_for_in_use(&media.pools().preview, 0).await;
    common::wait_for_in_use(&media.pools().frame, 0).await;
    assert!(manager.get_preview(stream_id).await.is_none());
}

#[tokio::test]
async fn test_stop_unknown_preview_is_not_running() {
    let dir = TempDir::new().unwrap();
    let manager = PreviewManager::new(transcode(&dir), slow_media(&dir, 1, 1));
    let stream_id = Uuid::new_v4();

    manager.start_preview(stream_id, "rtsp://cam/1").await.unwrap();
    manager.stop_preview(stream_id).await.unwrap();

    assert!(matches!(
        manager.stop_preview(stream_id).await,
        Err(SchedulerError::NotRunning { stream_id: id }) if id == stream_id
    ));
}

#[tokio::test]
async fn test_exited_preview_frees_its_slots() {
    let dir = TempDir::new().unwrap();
    let media = common::media(&PathBuf::from("true"), common::pools(1, 1, 1));
    let manager = PreviewManager::new(transcode(&dir), media.clone());
    let stream_id = Uuid::new_v4();

    manager.start_preview(stream_id, "rtsp://cam/1").await.unwrap();

    common::wait_for_in_use(&media.pools().frame, 0).await;
    common::wait_for_in_use(&media.pools().preview, 0).await;
    assert!(manager.get_preview(stream_id).await.is_none());
    assert!(matches!(
        manager.stop_preview(stream_id).await,
        Err(SchedulerError::NotRunning { .. })
    ));
}

#[tokio::test]
async fn test_preview_pool_exhaustion_leaks_nothing() {
    let dir = TempDir::new().unwrap();
    let media = slow_media(&dir, 2, 1);
    let manager = PreviewManager::new(transcode(&dir), media.clone());

    let first = Uuid::new_v4();
    manager.start_preview(first, "rtsp://cam/1").await.unwrap();

    let second = manager.start_preview(Uuid::new_v4(), "rtsp://cam/2").await;
    assert!(matches!(second, Err(SchedulerError::SlotExhausted { .. })));
    assert_eq!(media.pools().preview.in_use(), 1);
    assert_eq!(media.pools().frame.in_use(), 1);

    manager.stop_all().await;
    common::wait_for_in_use(&media.pools().preview, 0).await;
    common::wait_for_in_use(&media.pools().frame, 0).await;
    assert!(manager.list_previews().await.is_empty());
}

#[tokio::test]
async fn test_frame_pool_exhaustion_returns_preview_slot() {
    let dir = TempDir::new().unwrap();
    let media = slow_media(&dir, 0, 1);
    let manager = PreviewManager::new(transcode(&dir), media.clone());

    let result = manager.start_preview(Uuid::new_v4(), "rtsp://cam/1").await;
    assert!(matches!(result, Err(SchedulerError::SlotExhausted { .. })));
    common::wait_for_in_use(&media.pools().preview, 0).await;
}

#[tokio::test]
async fn test_media_server_preview_uses_preview_slot_only() {
    let dir = TempDir::new().unwrap();
    let bin = common::long_running_ffmpeg(dir.path());
    let media = common::media(&PathBuf::from("unused-ffmpeg"), common::pools(1, 1, 1));
    let strategy = PreviewStrategy::MediaServer {
        bin: bin.to_string_lossy().into_owned(),
        hls_base: "http://media.local:8888/".to_string(),
    };
    let manager = PreviewManager::new(strategy, media.clone());
    let stream_id = Uuid::new_v4();

    let handle = manager.start_preview(stream_id, "rtsp://cam/1").await.unwrap();
    assert_eq!(handle.playback_url, format!("http://media.local:8888/{stream_id}"));
    assert!(handle.pid.is_some());
    assert_eq!(media.pools().preview.in_use(), 1);
    assert_eq!(media.pools().frame.in_use(), 0);

    manager.stop_all().await;
    common::wait_for_in_use(&media.pools().preview, 0).await;
}

fn recorder(dir: &TempDir, media: MediaProcessManager) -> RecordManager {
    RecordManager::new(
        media,
        &RecordConfig {
            base_path: dir.path().join("records"),
            segment_sec: 60,
        },
    )
}

#[tokio::test]
async fn test_recording_lifecycle() {
    let dir = TempDir::new().unwrap();
    let media = slow_media(&dir, 1, 1);
    let manager = recorder(&dir, media.clone());
    let stream_id = Uuid::new_v4();

    let handle = manager.start_recording(stream_id, "rtsp://cam/1").await.unwrap();
    assert_eq!(handle.output_dir, dir.path().join("records").join(stream_id.to_string()));
    assert!(handle.output_dir.is_dir());
    assert!(manager.is_recording(stream_id).await);
    assert_eq!(media.pools().record.in_use(), 1);

    assert!(matches!(
        manager.start_recording(stream_id, "rtsp://cam/1").await,
        Err(SchedulerError::AlreadyRunning { .. })
    ));

    manager.stop_recording(stream_id).await.unwrap();
    assert!(!manager.is_recording(stream_id).await);
    common::wait_for_in_use(&media.pools().record, 0).await;

    assert!(matches!(
        manager.stop_recording(stream_id).await,
        Err(SchedulerError::NotRunning { .. })
    ));
}

#[tokio::test]
async fn test_record_pool_is_bounded() {
    let dir = TempDir::new().unwrap();
    let media = slow_media(&dir, 1, 1);
    let manager = recorder(&dir, media.clone());

    manager.start_recording(Uuid::new_v4(), "rtsp://cam/1").await.unwrap();
    assert!(matches!(
        manager.start_recording(Uuid::new_v4(), "rtsp://cam/2").await,
        Err(SchedulerError::SlotExhausted { .. })
    ));
    assert_eq!(manager.list_recordings().await.len(), 1);

    manager.stop_all().await;
    common::wait_for_in_use(&media.pools().record, 0).await;
    assert!(manager.list_recordings().await.is_empty());
}
