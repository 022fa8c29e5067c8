//! Binding Scheduler
//!
//! Turns enabled algorithm bindings into recurring "capture a frame, run
//! inference, store the result" jobs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Local, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::JobEngine;
use super::registry::JobRegistry;
use super::types::{JobCallback, JobKind, Recurrence};
use crate::config::Config;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::{AlgorithmBinding, BindingSchedule, InferenceResult, Stream};
use crate::observability::{FiringOutcome, SchedulerMetrics};
use crate::repositories::EntityStore;
use crate::services::inference_client::InferenceClient;
use crate::services::media_processes::MediaProcessManager;

/// Where frames go and how sources are addressed
#[derive(Debug, Clone)]
pub struct BindingSchedulerSettings {
    pub frames_path: PathBuf,
    /// Media server RTSP base; when set, sources are read through it
    pub rtsp_address: Option<String>,
    pub shutdown_grace: Duration,
}

impl From<&Config> for BindingSchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            frames_path: config.scheduler.frames_path.clone(),
            rtsp_address: config.media_server.rtsp_address.clone(),
            shutdown_grace: config.scheduler.shutdown_grace,
        }
    }
}

pub struct BindingScheduler {
    store: Arc<dyn EntityStore>,
    inference: Arc<dyn InferenceClient>,
    media: MediaProcessManager,
    registry: JobRegistry,
    settings: BindingSchedulerSettings,
    metrics: SchedulerMetrics,
    /// Parent scope of every frame capture started by a firing
    scope: CancellationToken,
}

impl BindingScheduler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        inference: Arc<dyn InferenceClient>,
        media: MediaProcessManager,
        engine: Arc<JobEngine>,
        settings: BindingSchedulerSettings,
        metrics: SchedulerMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            inference,
            media,
            registry: JobRegistry::new(JobKind::Binding, engine),
            settings,
            metrics,
            scope: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Schedule every enabled binding of every enabled stream.
    ///
    /// Bindings that fail to schedule are logged and skipped.
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<usize> {
        info!("Starting binding scheduler");
        let streams = self.store.list_streams().await?;
        let mut scheduled = 0;

        for stream in streams.iter().filter(|s| s.enabled) {
            let bindings = match self.store.list_bindings_by_stream(stream.id).await {
                Ok(bindings) => bindings,
                Err(e) => {
                    warn!("Failed to list bindings for stream '{}' ({}): {}", stream.name, stream.id, e);
                    continue;
                }
            };
            for binding in bindings.iter().filter(|b| b.enabled) {
                match self.schedule_binding(binding).await {
                    Ok(()) => scheduled += 1,
                    Err(e) => warn!(
                        "Failed to schedule binding {} on stream '{}': {}",
                        binding.id, stream.name, e
                    ),
                }
            }
        }

        info!("Binding scheduler started with {} job(s)", scheduled);
        Ok(scheduled)
    }

    /// Stop all binding jobs and the shared engine
    pub async fn stop(&self) {
        let removed = self.registry.clear().await;
        info!("Binding scheduler stopping, {} job(s) unscheduled", removed);
        self.registry.engine().shutdown(self.settings.shutdown_grace).await;
        self.scope.cancel();
    }

    /// Register a recurring job for `binding`; a no-op if one already exists
    pub async fn schedule_binding(self: &Arc<Self>, binding: &AlgorithmBinding) -> SchedulerResult<()> {
        if self.registry.is_scheduled(binding.id).await {
            debug!("Binding {} already scheduled, skipping", binding.id);
            return Ok(());
        }
        if binding.interval_sec == 0 {
            return Err(SchedulerError::invalid_schedule(format!(
                "binding {} has a zero interval",
                binding.id
            )));
        }

        let window = binding
            .schedule
            .as_ref()
            .filter(|value| !value.is_null())
            .map(BindingSchedule::from_value)
            .transpose()?;

        let recurrence = Recurrence::Interval {
            every: Duration::from_secs(binding.interval_sec),
            first_run_delay: Duration::from_secs(binding.initial_delay_sec),
        };

        if self
            .registry
            .schedule(binding.id, recurrence, self.firing_callback(window.clone()))
            .await?
        {
            info!(
                "Scheduled binding {} (stream {}, algorithm {}) every {}s{}",
                binding.id,
                binding.stream_id,
                binding.algorithm_id,
                binding.interval_sec,
                if window.is_some() { " within a time window" } else { "" }
            );
        }
        Ok(())
    }

    pub async fn unschedule_binding(&self, binding_id: Uuid) {
        if self.registry.unschedule(binding_id).await {
            info!("Unscheduled binding {}", binding_id);
        }
    }

    fn firing_callback(self: &Arc<Self>, window: Option<BindingSchedule>) -> JobCallback {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |binding_id| {
            let scheduler = scheduler.clone();
            let window = window.clone();
            Box::pin(async move {
                let Some(scheduler) = scheduler.upgrade() else {
                    return;
                };
                if let Some(window) = &window
                    && !window.admits(Local::now().naive_local())
                {
                    debug!("Binding {} outside its time window, skipping", binding_id);
                    scheduler
                        .metrics
                        .record_firing(JobKind::Binding, FiringOutcome::Skipped);
                    return;
                }
                scheduler.execute_inference(binding_id).await;
            })
        })
    }

    /// One firing: capture a frame, run inference on it, store the result.
    ///
    /// Failures end the firing; the job keeps its schedule unless the
    /// binding itself is gone or disabled.
    pub async fn execute_inference(&self, binding_id: Uuid) -> FiringOutcome {
        let outcome = match self.try_execute(binding_id).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => {
                debug!("Binding {} firing skipped: {}", binding_id, e);
                FiringOutcome::Skipped
            }
            Err(e) => {
                warn!("Binding {} firing failed: {}", binding_id, e);
                FiringOutcome::Failed
            }
        };
        self.metrics.record_firing(JobKind::Binding, outcome);
        outcome
    }

    async fn try_execute(&self, binding_id: Uuid) -> SchedulerResult<FiringOutcome> {
        let binding = match self.store.get_binding(binding_id).await {
            Ok(binding) => binding,
            Err(e) if e.is_not_found() => {
                info!("Binding {} no longer exists, unscheduling", binding_id);
                self.unschedule_binding(binding_id).await;
                return Ok(FiringOutcome::Unscheduled);
            }
            Err(e) => return Err(e.into()),
        };
        if !binding.enabled {
            info!("Binding {} is disabled, unscheduling", binding_id);
            self.unschedule_binding(binding_id).await;
            return Ok(FiringOutcome::Unscheduled);
        }

        let stream = match self.store.get_stream(binding.stream_id).await {
            Ok(stream) if stream.enabled => stream,
            Ok(_) => {
                debug!("Stream {} is disabled, skipping binding {}", binding.stream_id, binding_id);
                return Ok(FiringOutcome::Skipped);
            }
            Err(e) if e.is_not_found() => {
                debug!("Stream {} not found, skipping binding {}", binding.stream_id, binding_id);
                return Ok(FiringOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let algorithm = match self.store.get_algorithm(binding.algorithm_id).await {
            Ok(algorithm) => algorithm,
            Err(e) if e.is_not_found() => {
                debug!("Algorithm {} not found, skipping binding {}", binding.algorithm_id, binding_id);
                return Ok(FiringOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let source_url = self.source_url(&stream);
        let frame_path = MediaProcessManager::frame_path(&self.settings.frames_path, stream.id);
        self.media
            .extract_frame(&self.scope, stream.id, &source_url, &frame_path)
            .await?;

        let frame = tokio::fs::read(&frame_path).await?;
        let body = build_request_body(&frame, algorithm.input_spec.as_ref());

        let started = Instant::now();
        let response = self.inference.post(&algorithm.endpoint, &body).await?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let output = serde_json::from_slice(&response).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&response).into_owned())
        });

        let result = InferenceResult {
            id: Uuid::new_v4(),
            binding_id,
            stream_id: stream.id,
            ts: Utc::now(),
            frame_ref: frame_path.to_string_lossy().into_owned(),
            output,
            latency_ms,
        };
        self.store.create_result(&result).await?;

        debug!(
            "Binding {} inference on stream '{}' stored in {}ms",
            binding_id, stream.name, latency_ms
        );
        Ok(FiringOutcome::Completed)
    }

    /// Direct stream URL, or its path on the media server when one is configured
    pub fn source_url(&self, stream: &Stream) -> String {
        match &self.settings.rtsp_address {
            Some(address) if !address.trim().is_empty() => {
                format!("{}/{}", address.trim_end_matches('/'), stream.path_name())
            }
            _ => stream.url.clone(),
        }
    }
}

/// `{"image": <base64>}` merged with the algorithm's input spec; spec keys win
fn build_request_body(frame: &[u8], input_spec: Option<&serde_json::Value>) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(
        "image".to_string(),
        serde_json::Value::String(BASE64.encode(frame)),
    );
    if let Some(serde_json::Value::Object(spec)) = input_spec {
        for (key, value) in spec {
            body.insert(key.clone(), value.clone());
        }
    }
    serde_json::Value::Object(body)
}
