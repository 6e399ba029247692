use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::models::StatusUpdate;
use crate::state::SharedState;

/// Consumed boundary to whatever tracks job status for the user.
///
/// Implementations must be cheap and non-blocking; the engine never waits
/// on a sink to make progress. When no manager is attached, [`NoopSink`]
/// stands in.
pub trait StatusSink: Send + Sync {
    fn notify(&self, job_id: &str, update: StatusUpdate);
}

/// Sink that drops every update.
pub struct NoopSink;

impl StatusSink for NoopSink {
    fn notify(&self, _job_id: &str, _update: StatusUpdate) {}
}

struct Meter {
    last_notify: Instant,
    last_bytes: u64,
}

/// Thread-safe byte counter with throttled outward notification.
///
/// Every active worker feeds chunk lengths through [`add`]. The sink is
/// notified at most once per `interval`, except that reaching 100% always
/// notifies immediately so a terminal progress update is never lost.
/// Speed is the byte delta since the previous notification divided by the
/// elapsed time.
///
/// [`add`]: ProgressAggregator::add
pub struct ProgressAggregator {
    shared: Arc<SharedState>,
    sink: Arc<dyn StatusSink>,
    job_id: String,
    interval: Duration,
    meter: Mutex<Meter>,
}

impl ProgressAggregator {
    pub fn new(
        shared: Arc<SharedState>,
        sink: Arc<dyn StatusSink>,
        job_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            shared,
            sink,
            job_id: job_id.into(),
            interval,
            meter: Mutex::new(Meter {
                last_notify: Instant::now(),
                last_bytes: 0,
            }),
        }
    }

    /// Current progress percentage; 0 when the total size is unknown.
    pub fn percent(&self) -> f64 {
        let total = self.shared.total();
        if total == 0 {
            return 0.0;
        }
        ((self.shared.downloaded() as f64 / total as f64) * 100.0).min(100.0)
    }

    /// Records `n` freshly transferred bytes and notifies the sink when
    /// the throttle interval has elapsed or the job just reached 100%.
    pub fn add(&self, n: u64) {
        let downloaded = self.shared.add_downloaded(n);
        let total = self.shared.total();

        let notification = {
            let mut meter = self.meter.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            let elapsed = now.duration_since(meter.last_notify);
            let complete = total > 0 && downloaded >= total;
            if elapsed < self.interval && !complete {
                None
            } else {
                let speed = if elapsed.as_secs_f64() > 0.0 {
                    downloaded.saturating_sub(meter.last_bytes) as f64 / elapsed.as_secs_f64()
                } else {
                    0.0
                };
                meter.last_notify = now;
                meter.last_bytes = downloaded;
                let progress = if total > 0 {
                    ((downloaded as f64 / total as f64) * 100.0).min(100.0)
                } else {
                    0.0
                };
                Some(StatusUpdate::transfer(progress, speed))
            }
        };

        if let Some(update) = notification {
            tracing::debug!(
                job = %self.job_id,
                downloaded,
                total,
                "progress update"
            );
            self.sink.notify(&self.job_id, update);
        }
    }

    /// Un-counts bytes from a failed segment attempt. No notification:
    /// the next regular update reflects the corrected counter.
    pub fn rollback(&self, n: u64) {
        self.shared.sub_downloaded(n);
        let mut meter = self.meter.lock().unwrap_or_else(|p| p.into_inner());
        meter.last_bytes = meter.last_bytes.min(self.shared.downloaded());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusUpdate;

    struct RecordingSink(Mutex<Vec<StatusUpdate>>);

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn updates(&self) -> Vec<StatusUpdate> {
            self.0.lock().unwrap().clone()
        }
    }

    impl StatusSink for RecordingSink {
        fn notify(&self, _job_id: &str, update: StatusUpdate) {
            self.0.lock().unwrap().push(update);
        }
    }

    #[test]
    fn throttles_below_interval_but_always_notifies_completion() {
        let shared = Arc::new(SharedState::new(Some(100)));
        let sink = RecordingSink::new();
        let progress = ProgressAggregator::new(
            shared,
            sink.clone(),
            "job",
            Duration::from_secs(3600),
        );

        progress.add(10);
        progress.add(10);
        assert!(sink.updates().is_empty(), "updates inside the interval are suppressed");

        progress.add(80);
        let updates = sink.updates();
        assert_eq!(updates.len(), 1, "reaching 100% forces a notification");
        assert_eq!(updates[0].progress, Some(100.0));
    }

    #[test]
    fn zero_interval_reports_every_chunk_with_capped_percent() {
        let shared = Arc::new(SharedState::new(Some(200)));
        let sink = RecordingSink::new();
        let progress =
            ProgressAggregator::new(shared, sink.clone(), "job", Duration::ZERO);

        progress.add(50);
        progress.add(50);
        let updates = sink.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].progress, Some(25.0));
        assert_eq!(updates[1].progress, Some(50.0));
        assert!(updates.iter().all(|u| u.speed.is_some()));
    }

    #[test]
    fn unknown_total_reports_zero_percent() {
        let shared = Arc::new(SharedState::new(None));
        let sink = RecordingSink::new();
        let progress =
            ProgressAggregator::new(shared, sink.clone(), "job", Duration::ZERO);

        progress.add(4096);
        let updates = sink.updates();
        assert_eq!(updates[0].progress, Some(0.0));
    }

    #[test]
    fn rollback_corrects_counter_without_notifying() {
        let shared = Arc::new(SharedState::new(Some(100)));
        let sink = RecordingSink::new();
        let progress = ProgressAggregator::new(
            shared.clone(),
            sink.clone(),
            "job",
            Duration::from_secs(3600),
        );

        progress.add(40);
        progress.rollback(40);
        assert_eq!(shared.downloaded(), 0);
        assert!(sink.updates().is_empty());
    }
}
