//! OpenTelemetry metric instruments for the scheduler

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter, MeterProvider},
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tracing::info;

use crate::job_scheduling::JobKind;
use crate::services::slot_pool::SlotClass;

/// Outcome label for a job firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FiringOutcome {
    Completed,
    Skipped,
    Failed,
    Unscheduled,
}

/// Pre-built instruments shared by every component
#[derive(Clone)]
pub struct SchedulerMetrics {
    pub meter: Meter,

    pub slot_acquisitions: Counter<u64>,
    pub slot_rejections: Counter<u64>,

    pub process_starts: Counter<u64>,
    pub process_exits: Counter<u64>,
    pub process_launch_failures: Counter<u64>,

    pub job_firings: Counter<u64>,

    pub tasks_dispatched: Counter<u64>,
    pub tasks_failed: Counter<u64>,
}

impl std::fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerMetrics").finish_non_exhaustive()
    }
}

impl SchedulerMetrics {
    /// Install a local meter provider as the global one and build instruments from it
    pub fn init() -> (Self, SdkMeterProvider) {
        let provider = SdkMeterProvider::builder().build();
        global::set_meter_provider(provider.clone());
        let meter = provider.meter("vision-scheduler");
        info!("OpenTelemetry configured: local metrics only");
        (Self::build_with_instruments(meter), provider)
    }

    /// Instruments on whatever global provider is installed (a no-op one by default)
    pub fn noop() -> Self {
        Self::build_with_instruments(global::meter("vision-scheduler"))
    }

    fn build_with_instruments(meter: Meter) -> Self {
        let slot_acquisitions = meter
            .u64_counter("slot_acquisitions_total")
            .with_description("Slots handed out, by class")
            .build();
        let slot_rejections = meter
            .u64_counter("slot_rejections_total")
            .with_description("Acquire attempts refused because the pool was full")
            .build();

        let process_starts = meter
            .u64_counter("process_starts_total")
            .with_description("External media processes spawned")
            .build();
        let process_exits = meter
            .u64_counter("process_exits_total")
            .with_description("External media processes that terminated")
            .build();
        let process_launch_failures = meter
            .u64_counter("process_launch_failures_total")
            .with_description("External media processes that failed to spawn")
            .build();

        let job_firings = meter
            .u64_counter("job_firings_total")
            .with_description("Recurring job firings, by job kind and outcome")
            .build();

        let tasks_dispatched = meter
            .u64_counter("workflow_tasks_dispatched_total")
            .with_description("Workflow tasks handed to the engine")
            .build();
        let tasks_failed = meter
            .u64_counter("workflow_tasks_failed_total")
            .with_description("Workflow tasks marked failed by the scheduler")
            .build();

        Self {
            meter,
            slot_acquisitions,
            slot_rejections,
            process_starts,
            process_exits,
            process_launch_failures,
            job_firings,
            tasks_dispatched,
            tasks_failed,
        }
    }

    pub fn record_slot_acquired(&self, class: SlotClass) {
        self.slot_acquisitions
            .add(1, &[KeyValue::new("class", class.as_ref().to_string())]);
    }

    pub fn record_slot_rejected(&self, class: SlotClass) {
        self.slot_rejections
            .add(1, &[KeyValue::new("class", class.as_ref().to_string())]);
    }

    pub fn record_process_start(&self, class: SlotClass) {
        self.process_starts
            .add(1, &[KeyValue::new("class", class.as_ref().to_string())]);
    }

    pub fn record_process_exit(&self, class: SlotClass, success: bool) {
        self.process_exits.add(
            1,
            &[
                KeyValue::new("class", class.as_ref().to_string()),
                KeyValue::new("success", success),
            ],
        );
    }

    pub fn record_launch_failure(&self, class: SlotClass) {
        self.process_launch_failures
            .add(1, &[KeyValue::new("class", class.as_ref().to_string())]);
    }

    pub fn record_firing(&self, kind: JobKind, outcome: FiringOutcome) {
        self.job_firings.add(
            1,
            &[
                KeyValue::new("kind", kind.as_ref().to_string()),
                KeyValue::new("outcome", outcome.as_ref().to_string()),
            ],
        );
    }

    pub fn record_task_dispatched(&self) {
        self.tasks_dispatched.add(1, &[]);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.add(1, &[]);
    }
}
