//! Process-wide call counters, the ambient counterpart to the `tracing`
//! spans/events already scattered through the dispatcher (`spec.md` §6,
//! "persisted state: none ... apart from process-wide counters"; §4.11,
//! Observability).
//!
//! Every counter bump here is paired with the `tracing` event that
//! describes the same lifecycle boundary, so a counter and a log line are
//! never the only record of something happening; whichever sink (metrics
//! scraping vs. log aggregation) an operator has wired up sees the same
//! story.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A cheaply cloneable handle onto one process's gRPC call counters.
/// Typically built once (`Metrics::default()`) and shared across every
/// registered service via [`super::Grpc`].
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    total_calls: AtomicU64,
    current_calls: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    calls_failed: AtomicU64,
    deadline_exceeded: AtomicU64,
    unimplemented: AtomicU64,
}

/// RAII guard returned by [`Metrics::call_started`]; decrements
/// `current_calls` and records the terminal outcome when a call finishes,
/// however it finishes (success, handler error, deadline, or `Drop`ped
/// without an explicit outcome being recorded, which is treated as
/// `failed`).
pub struct CallGuard {
    metrics: Metrics,
    outcome_recorded: bool,
}

impl Metrics {
    /// Records a new call starting: bumps `total_calls` and `current_calls`,
    /// returning a guard that decrements `current_calls` again on drop.
    pub fn call_started(&self) -> CallGuard {
        self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.current_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("call started");
        CallGuard {
            metrics: self.clone(),
            outcome_recorded: false,
        }
    }

    /// Records one request message having been fully decoded.
    pub fn message_received(&self) {
        self.inner.messages_received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("message received");
    }

    /// Records one response message having been fully encoded.
    pub fn message_sent(&self) {
        self.inner.messages_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("message sent");
    }

    /// Records a method/service path that had no registered handler
    /// (`spec.md` §8, scenario 6).
    pub fn unimplemented(&self, path: &str) {
        self.inner.unimplemented.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%path, "call to unimplemented method");
    }

    /// Total calls dispatched since process start.
    pub fn total_calls(&self) -> u64 {
        self.inner.total_calls.load(Ordering::Relaxed)
    }

    /// Calls currently in flight.
    pub fn current_calls(&self) -> u64 {
        self.inner.current_calls.load(Ordering::Relaxed)
    }

    /// Request messages decoded since process start.
    pub fn messages_received_total(&self) -> u64 {
        self.inner.messages_received.load(Ordering::Relaxed)
    }

    /// Response messages encoded since process start.
    pub fn messages_sent_total(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Relaxed)
    }

    /// Calls that ended with a non-`Ok` status.
    pub fn calls_failed_total(&self) -> u64 {
        self.inner.calls_failed.load(Ordering::Relaxed)
    }

    /// Calls that ended because their deadline elapsed.
    pub fn deadline_exceeded_total(&self) -> u64 {
        self.inner.deadline_exceeded.load(Ordering::Relaxed)
    }

    /// Calls to a method/service with no registered handler.
    pub fn unimplemented_total(&self) -> u64 {
        self.inner.unimplemented.load(Ordering::Relaxed)
    }
}

impl CallGuard {
    /// Records the call's terminal [`crate::Code`], bumping `calls_failed`
    /// and/or `deadline_exceeded` as appropriate. Idempotent: only the
    /// first call has any effect, matching the deadline manager's "exactly
    /// one terminal transition" invariant (`spec.md` §3, DeadlineManager).
    pub fn record_outcome(&mut self, code: crate::Code) {
        if self.outcome_recorded {
            return;
        }
        self.outcome_recorded = true;

        if code == crate::Code::DeadlineExceeded {
            self.metrics
                .inner
                .deadline_exceeded
                .fetch_add(1, Ordering::Relaxed);
            tracing::info!("call deadline exceeded");
        }
        if code != crate::Code::Ok {
            self.metrics.inner.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.metrics.inner.current_calls.fetch_sub(1, Ordering::Relaxed);
        if !self.outcome_recorded {
            self.metrics.inner.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!("call finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_started_tracks_current_and_total() {
        let metrics = Metrics::default();
        let guard = metrics.call_started();
        assert_eq!(metrics.total_calls(), 1);
        assert_eq!(metrics.current_calls(), 1);
        drop(guard);
        assert_eq!(metrics.current_calls(), 0);
    }

    #[test]
    fn recording_ok_does_not_count_as_failed() {
        let metrics = Metrics::default();
        let mut guard = metrics.call_started();
        guard.record_outcome(crate::Code::Ok);
        drop(guard);
        assert_eq!(metrics.calls_failed_total(), 0);
    }

    #[test]
    fn dropping_without_recording_counts_as_failed() {
        let metrics = Metrics::default();
        let guard = metrics.call_started();
        drop(guard);
        assert_eq!(metrics.calls_failed_total(), 1);
    }

    #[test]
    fn deadline_exceeded_bumps_its_own_counter() {
        let metrics = Metrics::default();
        let mut guard = metrics.call_started();
        guard.record_outcome(crate::Code::DeadlineExceeded);
        drop(guard);
        assert_eq!(metrics.deadline_exceeded_total(), 1);
        assert_eq!(metrics.calls_failed_total(), 1);
    }

    #[test]
    fn unimplemented_is_tracked_separately() {
        let metrics = Metrics::default();
        metrics.unimplemented("/foo.Bar/Baz");
        assert_eq!(metrics.unimplemented_total(), 1);
    }
}
