//! Outstanding-operation counters and latency tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::constants::STOP_LOG_INTERVAL;

/// Counts operations that have been dispatched but not yet completed.
///
/// Components take a guard with [`OpCounter::begin`] while holding their
/// state lock and drop it after the listener has been told the outcome.
pub(crate) struct OpCounter {
    name: &'static str,
    count: watch::Sender<usize>,
}

impl OpCounter {
    pub(crate) fn new(name: &'static str) -> Arc<Self> {
        let (count, _) = watch::channel(0);
        Arc::new(Self { name, count })
    }

    pub(crate) fn begin(self: &Arc<Self>) -> OpGuard {
        self.count.send_modify(|count| *count += 1);
        OpGuard {
            counter: Arc::clone(self),
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once no operations are outstanding.
    pub(crate) async fn drained(&self) {
        let mut rx = self.count.subscribe();
        let mut progress = tokio::time::interval(STOP_LOG_INTERVAL);
        progress.tick().await;

        loop {
            let remaining = *rx.borrow_and_update();
            if remaining == 0 {
                return;
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = progress.tick() => {
                    debug!("Waiting for {} to complete - {} remaining", self.name, remaining);
                }
            }
        }
    }
}

/// Decrements its counter exactly once, when dropped.
pub(crate) struct OpGuard {
    counter: Arc<OpCounter>,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.counter
            .count
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Tracks in-flight physical requests to report access latency.
#[derive(Default)]
pub(crate) struct LatencyTracker {
    next_id: AtomicU64,
    active: DashMap<u64, Instant>,
    last: Mutex<Duration>,
}

impl LatencyTracker {
    pub(crate) fn begin(&self) -> ActiveAccess<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        self.active.insert(id, started);
        ActiveAccess {
            tracker: self,
            id,
            started,
        }
    }

    /// Longest of the last completed request and any request still running.
    pub(crate) fn latency(&self) -> Duration {
        let now = Instant::now();
        self.active
            .iter()
            .map(|entry| now.saturating_duration_since(*entry.value()))
            .fold(*self.last.lock(), Duration::max)
    }
}

pub(crate) struct ActiveAccess<'a> {
    tracker: &'a LatencyTracker,
    id: u64,
    started: Instant,
}

impl ActiveAccess<'_> {
    pub(crate) fn complete(self) {
        *self.tracker.last.lock() = self.started.elapsed();
    }
}

impl Drop for ActiveAccess<'_> {
    fn drop(&mut self) {
        self.tracker.active.remove(&self.id);
    }
}
