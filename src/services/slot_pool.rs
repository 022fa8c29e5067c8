//! Slot Pool Service
//!
//! Bounded admission control for external media processes. One pool exists
//! per process class; `acquire` never waits, it either hands out a permit or
//! fails with `SlotExhausted` so the caller can try again on its next tick.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::observability::SchedulerMetrics;

/// Class of external process a slot is reserved for
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotClass {
    /// Long-running segment recordings
    Record,
    /// Frame extraction and self-hosted transcoding
    Frame,
    /// Live preview sessions
    Preview,
}

/// Counting admission-control pool
#[derive(Clone)]
pub struct SlotPool {
    class: SlotClass,
    capacity: usize,
    /// Number of permits currently handed out
    in_use: Arc<Mutex<usize>>,
    metrics: SchedulerMetrics,
}

impl fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("class", &self.class)
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl SlotPool {
    pub fn new(class: SlotClass, capacity: usize) -> Self {
        Self::with_metrics(class, capacity, SchedulerMetrics::noop())
    }

    pub fn with_metrics(class: SlotClass, capacity: usize, metrics: SchedulerMetrics) -> Self {
        Self {
            class,
            capacity,
            in_use: Arc::new(Mutex::new(0)),
            metrics,
        }
    }

    /// Take one slot, failing immediately when the pool is full.
    ///
    /// The returned permit is released exactly once: by an explicit
    /// [`SlotPermit::release`], when the last clone of the permit is dropped,
    /// or when `scope` is cancelled, whichever comes first.
    pub fn acquire(&self, scope: &CancellationToken) -> SchedulerResult<SlotPermit> {
        {
            let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
            if *in_use >= self.capacity {
                debug!(
                    "{} pool exhausted ({}/{} in use)",
                    self.class, *in_use, self.capacity
                );
                self.metrics.record_slot_rejected(self.class);
                return Err(SchedulerError::SlotExhausted {
                    class: self.class,
                    capacity: self.capacity,
                });
            }
            *in_use += 1;
            trace!("{} slot acquired ({}/{})", self.class, *in_use, self.capacity);
        }
        self.metrics.record_slot_acquired(self.class);

        let inner = Arc::new(PermitInner {
            class: self.class,
            in_use: self.in_use.clone(),
            released: AtomicBool::new(false),
            done: CancellationToken::new(),
        });
        Self::watch_scope(Arc::downgrade(&inner), inner.done.clone(), scope.clone());

        Ok(SlotPermit { inner })
    }

    /// Release the permit if its scope is cancelled before anything else does.
    ///
    /// The watcher holds only a weak reference so it never keeps a dropped
    /// permit alive, and it exits as soon as the permit is released.
    fn watch_scope(permit: Weak<PermitInner>, done: CancellationToken, scope: CancellationToken) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, scope watcher not installed");
            return;
        };
        handle.spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {
                    if let Some(inner) = permit.upgrade() {
                        if inner.release() {
                            debug!("{} slot released by scope cancellation", inner.class);
                        }
                    }
                }
                _ = done.cancelled() => {}
            }
        });
    }

    pub fn class(&self) -> SlotClass {
        self.class
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use())
    }

    pub(crate) fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }
}

/// The three pools shared by every component of the process
#[derive(Debug, Clone)]
pub struct SlotPools {
    pub record: SlotPool,
    pub frame: SlotPool,
    pub preview: SlotPool,
}

impl SlotPools {
    pub fn new(max_record: usize, max_frame: usize, max_preview: usize, metrics: SchedulerMetrics) -> Self {
        Self {
            record: SlotPool::with_metrics(SlotClass::Record, max_record, metrics.clone()),
            frame: SlotPool::with_metrics(SlotClass::Frame, max_frame, metrics.clone()),
            preview: SlotPool::with_metrics(SlotClass::Preview, max_preview, metrics),
        }
    }

    pub fn get(&self, class: SlotClass) -> &SlotPool {
        match class {
            SlotClass::Record => &self.record,
            SlotClass::Frame => &self.frame,
            SlotClass::Preview => &self.preview,
        }
    }
}

struct PermitInner {
    class: SlotClass,
    in_use: Arc<Mutex<usize>>,
    released: AtomicBool,
    done: CancellationToken,
}

impl PermitInner {
    /// Returns true only for the call that actually gave the slot back
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        {
            let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
            *in_use = in_use.saturating_sub(1);
            trace!("{} slot released ({} in use)", self.class, *in_use);
        }
        self.done.cancel();
        true
    }
}

impl Drop for PermitInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to one acquired slot; clones share the same underlying slot
#[derive(Clone)]
pub struct SlotPermit {
    inner: Arc<PermitInner>,
}

impl fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPermit")
            .field("class", &self.inner.class)
            .field("released", &self.is_released())
            .finish()
    }
}

impl SlotPermit {
    /// Give the slot back. Safe to call any number of times from any clone.
    pub fn release(&self) -> bool {
        self.inner.release()
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn class(&self) -> SlotClass {
        self.inner.class
    }
}
