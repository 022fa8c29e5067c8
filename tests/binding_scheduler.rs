#![cfg(unix)]

mod common;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use vision_scheduler::errors::{InferenceError, SchedulerError};
use vision_scheduler::job_scheduling::{BindingScheduler, BindingSchedulerSettings, JobEngine};
use vision_scheduler::observability::{FiringOutcome, SchedulerMetrics};
use vision_scheduler::repositories::InMemoryStore;
use vision_scheduler::services::{InferenceClient, MediaProcessManager};

mock! {
    pub Inference {}

    #[async_trait]
    impl InferenceClient for Inference {
        async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<Bytes, InferenceError>;
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<InMemoryStore>,
    scheduler: Arc<BindingScheduler>,
    media: MediaProcessManager,
    frames: std::path::PathBuf,
}

fn harness(inference: MockInference, frame_capacity: usize, rtsp_address: Option<&str>) -> Harness {
    let dir = TempDir::new().unwrap();
    let ffmpeg = common::fake_frame_ffmpeg(dir.path(), "fakejpeg");
    let frames = dir.path().join("frames");
    let media = common::media(&ffmpeg, common::pools(1, frame_capacity, 1));
    let store = Arc::new(InMemoryStore::new());

    let scheduler = BindingScheduler::new(
        store.clone(),
        Arc::new(inference),
        media.clone(),
        Arc::new(JobEngine::new()),
        BindingSchedulerSettings {
            frames_path: frames.clone(),
            rtsp_address: rtsp_address.map(str::to_string),
            shutdown_grace: Duration::from_secs(1),
        },
        SchedulerMetrics::noop(),
    );

    Harness {
        _dir: dir,
        store,
        scheduler,
        media,
        frames,
    }
}

#[tokio::test]
async fn test_firing_stores_inference_result() {
    let mut inference = MockInference::new();
    inference
        .expect_post()
        .withf(|endpoint, body| {
            endpoint.to_string() == "http://models.local/detect"
                && body["image"] == serde_json::json!(base64::engine::general_purpose::STANDARD.encode("fakejpeg"))
                && body["threshold"] == serde_json::json!(0.4)
        })
        .times(1)
        .returning(|_, _| Ok(Bytes::from_static(br#"{"objects":[{"label":"person"}]}"#)));

    let h = harness(inference, 2, None);
    let stream = common::stream("Lobby");
    let algorithm = common::algorithm("http://models.local/detect");
    let binding = common::binding(&stream, &algorithm, 3600);
    h.store.upsert_stream(stream.clone()).await;
    h.store.upsert_algorithm(algorithm).await;
    h.store.upsert_binding(binding.clone()).await;

    assert_eq!(h.scheduler.execute_inference(binding.id).await, FiringOutcome::Completed);

    let results = h.store.results().await;
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.binding_id, binding.id);
    assert_eq!(result.stream_id, stream.id);
    assert_eq!(result.output["objects"][0]["label"], "person");
    assert!(result.frame_ref.starts_with(&h.frames.join(stream.id.to_string()).to_string_lossy().into_owned()));
    assert!(std::path::Path::new(&result.frame_ref).exists());

    common::wait_for_in_use(&h.media.pools().frame, 0).await;
}

#[tokio::test]
async fn test_first_tick_runs_one_capture_and_one_post() {
    let mut inference = MockInference::new();
    inference
        .expect_post()
        .times(1)
        .returning(|_, _| Ok(Bytes::from_static(br#"{"objects":[]}"#)));

    let h = harness(inference, 1, None);
    let stream = common::stream("Hall");
    let algorithm = common::algorithm("http://models.local/detect");
    let binding = common::binding(&stream, &algorithm, 5);
    h.store.upsert_stream(stream.clone()).await;
    h.store.upsert_algorithm(algorithm).await;
    h.store.upsert_binding(binding.clone()).await;

    h.scheduler.schedule_binding(&binding).await.unwrap();
    for _ in 0..200 {
        if !h.store.results().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.scheduler.stop().await;

    let results = h.store.results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].binding_id, binding.id);
    let frames = std::fs::read_dir(h.frames.join(stream.id.to_string())).unwrap().count();
    assert_eq!(frames, 1);
}

#[tokio::test]
async fn test_non_json_response_is_kept_as_text() {
    let mut inference = MockInference::new();
    inference
        .expect_post()
        .returning(|_, _| Ok(Bytes::from_static(b"no detections")));

    let h = harness(inference, 1, None);
    let stream = common::stream("Yard");
    let algorithm = common::algorithm("http://models.local/detect");
    let binding = common::binding(&stream, &algorithm, 60);
    h.store.upsert_stream(stream).await;
    h.store.upsert_algorithm(algorithm).await;
    h.store.upsert_binding(binding.clone()).await;

    assert_eq!(h.scheduler.execute_inference(binding.id).await, FiringOutcome::Completed);
    assert_eq!(h.store.results().await[0].output, serde_json::json!("no detections"));
}

#[tokio::test]
async fn test_schedule_binding_is_idempotent() {
    let h = harness(MockInference::new(), 1, None);
    let stream = common::stream("Gate");
    let algorithm = common::algorithm("http://models.local/detect");
    let mut binding = common::binding(&stream, &algorithm, 3600);
    binding.initial_delay_sec = 3600;

    h.scheduler.schedule_binding(&binding).await.unwrap();
    let job_id = h.scheduler.registry().get(binding.id).await.unwrap().engine_job_id();
    h.scheduler.schedule_binding(&binding).await.unwrap();

    assert_eq!(h.scheduler.registry().len().await, 1);
    assert_eq!(h.scheduler.registry().get(binding.id).await.unwrap().engine_job_id(), job_id);

    h.scheduler.unschedule_binding(binding.id).await;
    h.scheduler.unschedule_binding(binding.id).await;
    assert!(h.scheduler.registry().is_empty().await);
}

#[tokio::test]
async fn test_invalid_bindings_are_rejected() {
    let h = harness(MockInference::new(), 1, None);
    let stream = common::stream("Gate");
    let algorithm = common::algorithm("http://models.local/detect");

    let mut bad_window = common::binding(&stream, &algorithm, 60);
    bad_window.schedule = Some(serde_json::json!({ "start": "nine", "end": "17:00" }));
    assert!(matches!(
        h.scheduler.schedule_binding(&bad_window).await,
        Err(SchedulerError::InvalidSchedule { .. })
    ));

    let zero_interval = common::binding(&stream, &algorithm, 0);
    assert!(h.scheduler.schedule_binding(&zero_interval).await.is_err());
    assert!(h.scheduler.registry().is_empty().await);
}

#[tokio::test]
async fn test_disabled_or_deleted_binding_unschedules_itself() {
    let h = harness(MockInference::new(), 1, None);
    let stream = common::stream("Dock");
    let algorithm = common::algorithm("http://models.local/detect");
    let mut binding = common::binding(&stream, &algorithm, 3600);
    binding.initial_delay_sec = 3600;
    h.store.upsert_stream(stream.clone()).await;
    h.store.upsert_algorithm(algorithm.clone()).await;

    binding.enabled = false;
    h.store.upsert_binding(binding.clone()).await;
    h.scheduler.schedule_binding(&binding).await.unwrap();
    assert_eq!(h.scheduler.execute_inference(binding.id).await, FiringOutcome::Unscheduled);
    assert!(!h.scheduler.registry().is_scheduled(binding.id).await);

    let gone = common::binding(&stream, &algorithm, 3600);
    h.scheduler.schedule_binding(&gone).await.unwrap();
    assert_eq!(h.scheduler.execute_inference(gone.id).await, FiringOutcome::Unscheduled);
    assert!(!h.scheduler.registry().is_scheduled(gone.id).await);
}

#[tokio::test]
async fn test_disabled_stream_skips_but_keeps_job() {
    let h = harness(MockInference::new(), 1, None);
    let mut stream = common::stream("Dock");
    stream.enabled = false;
    let algorithm = common::algorithm("http://models.local/detect");
    let mut binding = common::binding(&stream, &algorithm, 3600);
    binding.initial_delay_sec = 3600;
    h.store.upsert_stream(stream).await;
    h.store.upsert_algorithm(algorithm).await;
    h.store.upsert_binding(binding.clone()).await;

    h.scheduler.schedule_binding(&binding).await.unwrap();
    assert_eq!(h.scheduler.execute_inference(binding.id).await, FiringOutcome::Skipped);
    assert!(h.scheduler.registry().is_scheduled(binding.id).await);
    assert!(h.store.results().await.is_empty());
}

#[tokio::test]
async fn test_exhausted_frame_pool_skips_firing() {
    let h = harness(MockInference::new(), 0, None);
    let stream = common::stream("Dock");
    let algorithm = common::algorithm("http://models.local/detect");
    let binding = common::binding(&stream, &algorithm, 3600);
    h.store.upsert_stream(stream).await;
    h.store.upsert_algorithm(algorithm).await;
    h.store.upsert_binding(binding.clone()).await;

    assert_eq!(h.scheduler.execute_inference(binding.id).await, FiringOutcome::Skipped);
    assert!(h.store.results().await.is_empty());
}

#[tokio::test]
async fn test_inference_failure_aborts_firing() {
    let mut inference = MockInference::new();
    inference.expect_post().times(1).returning(|_, _| {
        Err(InferenceError::Status {
            status: 503,
            body: "busy".to_string(),
        })
    });

    let h = harness(inference, 1, None);
    let stream = common::stream("Dock");
    let algorithm = common::algorithm("http://models.local/detect");
    let binding = common::binding(&stream, &algorithm, 3600);
    h.store.upsert_stream(stream).await;
    h.store.upsert_algorithm(algorithm).await;
    h.store.upsert_binding(binding.clone()).await;

    assert_eq!(h.scheduler.execute_inference(binding.id).await, FiringOutcome::Failed);
    assert!(h.store.results().await.is_empty());
    common::wait_for_in_use(&h.media.pools().frame, 0).await;
}

#[tokio::test]
async fn test_window_that_never_opens_gates_every_firing() {
    let h = harness(MockInference::new(), 1, None);
    let stream = common::stream("Dock");
    let algorithm = common::algorithm("http://models.local/detect");
    let mut binding = common::binding(&stream, &algorithm, 1);
    binding.schedule = Some(serde_json::json!({ "start": "00:00", "end": "00:00" }));
    h.store.upsert_stream(stream).await;
    h.store.upsert_algorithm(algorithm).await;
    h.store.upsert_binding(binding.clone()).await;

    h.scheduler.schedule_binding(&binding).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.store.results().await.is_empty());
    assert!(h.scheduler.registry().is_scheduled(binding.id).await);
    h.scheduler.stop().await;
}

#[tokio::test]
async fn test_disabled_binding_outside_window_is_removed_at_next_admitted_firing() {
    let h = harness(MockInference::new(), 1, None);
    let stream = common::stream("Dock");
    let algorithm = common::algorithm("http://models.local/detect");
    let mut binding = common::binding(&stream, &algorithm, 1);
    binding.schedule = Some(serde_json::json!({ "start": "00:00", "end": "00:00" }));
    h.store.upsert_stream(stream).await;
    h.store.upsert_algorithm(algorithm).await;
    h.scheduler.schedule_binding(&binding).await.unwrap();

    binding.enabled = false;
    h.store.upsert_binding(binding.clone()).await;
    tokio::time::sleep(Duration::from_millis(1300)).await;

    // Closed-window firings never look at the binding
    assert!(h.scheduler.registry().is_scheduled(binding.id).await);

    assert_eq!(h.scheduler.execute_inference(binding.id).await, FiringOutcome::Unscheduled);
    assert!(!h.scheduler.registry().is_scheduled(binding.id).await);
    h.scheduler.stop().await;
}

#[tokio::test]
async fn test_start_schedules_enabled_bindings_of_enabled_streams() {
    let h = harness(MockInference::new(), 1, None);
    let algorithm = common::algorithm("http://models.local/detect");
    let live = common::stream("Live");
    let mut off = common::stream("Off");
    off.enabled = false;

    let mut b1 = common::binding(&live, &algorithm, 3600);
    b1.initial_delay_sec = 3600;
    let mut b2 = common::binding(&live, &algorithm, 3600);
    b2.enabled = false;
    let mut b3 = common::binding(&off, &algorithm, 3600);
    b3.initial_delay_sec = 3600;
    let mut b4 = common::binding(&live, &algorithm, 3600);
    b4.schedule = Some(serde_json::json!({ "start": "bad", "end": "17:00" }));

    for s in [live, off] {
        h.store.upsert_stream(s).await;
    }
    for b in [b1.clone(), b2, b3, b4] {
        h.store.upsert_binding(b).await;
    }

    assert_eq!(h.scheduler.start().await.unwrap(), 1);
    assert_eq!(h.scheduler.registry().owners().await, vec![b1.id]);
    h.scheduler.stop().await;
}

#[tokio::test]
async fn test_source_url_through_media_server() {
    let h = harness(MockInference::new(), 1, Some("rtsp://127.0.0.1:8554/"));
    let stream = common::stream("Front Door");
    assert_eq!(h.scheduler.source_url(&stream), "rtsp://127.0.0.1:8554/front_door");

    let direct = harness(MockInference::new(), 1, None);
    assert_eq!(direct.scheduler.source_url(&stream), stream.url);
}
