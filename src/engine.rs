use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::DownloadError;
use crate::merge;
use crate::models::{ConnectionMode, DownloadJob, JobPhase, StatusUpdate};
use crate::planner;
use crate::probe;
use crate::progress::{NoopSink, ProgressAggregator, StatusSink};
use crate::state::SharedState;
use crate::stream;
use crate::worker::SegmentWorker;

/// Cancellation and observation handle for a running job.
///
/// Cheap to clone; all methods go through the job's [`SharedState`], so a
/// handle stays valid for the whole engine lifetime.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<SharedState>,
}

impl JobHandle {
    /// Requests cooperative cancellation. Irreversible; in-flight I/O
    /// finishes its current chunk before workers observe the flag.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.shared.downloaded()
    }

    /// Total size in bytes; 0 while still unknown.
    pub fn total_bytes(&self) -> u64 {
        self.shared.total()
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.shared.mode()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.error()
    }
}

/// Top-level download state machine.
///
/// Owns the job for its lifetime: probes for range support, picks the
/// transfer strategy, runs the segment workers or the fallback stream,
/// merges, cleans up, and emits exactly one terminal status. Every exit
/// path removes the temp directory; the output file survives only on
/// success.
pub struct DownloadEngine {
    client: Client,
    job: DownloadJob,
    shared: Arc<SharedState>,
    progress: Arc<ProgressAggregator>,
    sink: Arc<dyn StatusSink>,
}

impl DownloadEngine {
    pub fn new(job: DownloadJob, sink: Arc<dyn StatusSink>) -> Result<Self, DownloadError> {
        // The probe gets its own short per-request deadline; transfers
        // may legitimately run long, so the client only bounds connection
        // establishment and inter-chunk stalls.
        let client = Client::builder()
            .user_agent(concat!("parget/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(job.options.connect_timeout)
            .read_timeout(job.options.read_timeout)
            .build()?;

        let shared = Arc::new(SharedState::new(job.known_size.filter(|&n| n > 0)));
        let progress = Arc::new(ProgressAggregator::new(
            shared.clone(),
            sink.clone(),
            job.id.clone(),
            job.options.status_interval,
        ));

        Ok(Self {
            client,
            job,
            shared,
            progress,
            sink,
        })
    }

    /// Engine with no manager attached; status updates are dropped.
    pub fn detached(job: DownloadJob) -> Result<Self, DownloadError> {
        Self::new(job, Arc::new(NoopSink))
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            shared: self.shared.clone(),
        }
    }

    /// Runs the job to its terminal state. Returns `Ok(())` on success,
    /// `Err(DownloadError::Cancelled)` for a user cancellation, and any
    /// other error for a failure; the same outcome is emitted through the
    /// status sink either way.
    pub async fn run(self) -> Result<(), DownloadError> {
        let temp_dir = self.job.temp_dir();

        // A stale temp directory can only be debris from a crashed run of
        // the same job id; parts are never reused across starts.
        if temp_dir.exists() {
            tracing::warn!(job = %self.job.id, dir = %temp_dir.display(), "removing leftover temp directory");
            tokio::fs::remove_dir_all(&temp_dir).await.ok();
        }

        self.notify(StatusUpdate::phase(JobPhase::Probing));
        let result = self.execute(&temp_dir).await;
        self.finish(&temp_dir, result).await
    }

    async fn execute(&self, temp_dir: &Path) -> Result<(), DownloadError> {
        let probed = probe::probe(
            &self.client,
            &self.job.url,
            self.job.bearer_token.as_deref(),
            self.job.options.probe_timeout,
        )
        .await;

        if self.shared.total() == 0 {
            if let Some(size) = probed.size {
                self.shared.set_total(size);
            }
        }
        if self.shared.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let total = self.shared.total();
        let options = &self.job.options;
        let use_multi = probed.supports_ranges
            && options.connections > 1
            && total > 0
            && total > options.multi_threshold;

        if use_multi {
            self.notify(StatusUpdate::phase(JobPhase::Planning));
            let segments = planner::plan(total, options.connections);
            if segments.is_empty() {
                tracing::warn!(
                    job = %self.job.id,
                    total,
                    connections = options.connections,
                    "planning produced no usable segments, falling back to single stream"
                );
                return self.run_single(&probed.resolved_url).await;
            }
            self.run_multi(&probed.resolved_url, temp_dir, segments, total)
                .await
        } else {
            tracing::info!(
                job = %self.job.id,
                supports_ranges = probed.supports_ranges,
                total,
                "using single-stream transfer"
            );
            self.run_single(&probed.resolved_url).await
        }
    }

    async fn run_single(&self, url: &str) -> Result<(), DownloadError> {
        self.shared.set_mode(ConnectionMode::Single);
        self.notify(StatusUpdate {
            connection_mode: Some(ConnectionMode::Single),
            status: Some(JobPhase::Downloading),
            ..StatusUpdate::default()
        });

        stream::stream_to_output(
            &self.client,
            url,
            self.job.bearer_token.as_deref(),
            &self.job.output_path,
            self.job.options.chunk_size,
            &self.shared,
            &self.progress,
        )
        .await?;

        if self.shared.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        Ok(())
    }

    async fn run_multi(
        &self,
        url: &str,
        temp_dir: &Path,
        segments: Vec<planner::Segment>,
        expected_total: u64,
    ) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(temp_dir).await?;

        let mode = ConnectionMode::Multi(segments.len() as u32);
        self.shared.set_mode(mode);
        self.notify(StatusUpdate {
            connection_mode: Some(mode),
            status: Some(JobPhase::Downloading),
            ..StatusUpdate::default()
        });
        tracing::info!(
            job = %self.job.id,
            total = expected_total,
            segments = segments.len(),
            "starting multi-connection download"
        );

        let handles: Vec<JoinHandle<()>> = segments
            .iter()
            .map(|&segment| {
                let worker = SegmentWorker::new(
                    self.client.clone(),
                    url.to_string(),
                    self.job.bearer_token.clone(),
                    segment,
                    segment.part_file(temp_dir),
                    self.job.options.chunk_size,
                    self.job.options.segment_retries,
                    self.shared.clone(),
                    self.progress.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        // Poll at a short interval instead of blocking on any one worker;
        // cancellation and failures are observed through shared state.
        loop {
            if handles.iter().all(|h| h.is_finished()) {
                break;
            }
            tokio::time::sleep(self.job.options.poll_interval).await;
        }
        for handle in handles {
            let _ = handle.await;
        }

        if self.shared.is_user_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if let Some(error) = self.shared.error() {
            return Err(DownloadError::Failed(error));
        }
        let downloaded = self.shared.downloaded();
        if downloaded != expected_total {
            return Err(DownloadError::SizeMismatch {
                expected: expected_total,
                actual: downloaded,
            });
        }

        self.notify(StatusUpdate::phase(JobPhase::Merging));
        merge::merge_parts(
            &segments,
            temp_dir,
            &self.job.output_path,
            expected_total,
            self.shared.is_cancelled(),
            self.job.options.chunk_size,
        )
        .await
    }

    /// Exit actions shared by every terminal path: temp directory removal,
    /// output removal unless completed, and the single final status.
    async fn finish(
        &self,
        temp_dir: &Path,
        result: Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        // A cancellation that lands between the last checkpoint and here
        // (including during merge) still terminates as cancelled.
        let result = if self.shared.is_user_cancelled() {
            Err(DownloadError::Cancelled)
        } else {
            result
        };

        if let Err(e) = &result {
            if !matches!(e, DownloadError::Cancelled) {
                self.shared.record_error(e.to_string());
            }
        }

        if temp_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(temp_dir).await {
                tracing::warn!(dir = %temp_dir.display(), error = %e, "could not remove temp directory");
            }
        }
        if result.is_err() && self.job.output_path.exists() {
            if let Err(e) = tokio::fs::remove_file(&self.job.output_path).await {
                tracing::warn!(
                    path = %self.job.output_path.display(),
                    error = %e,
                    "could not remove incomplete output file"
                );
            }
        }

        let (status, progress) = match &result {
            Ok(()) => (JobPhase::Completed, 100.0),
            Err(DownloadError::Cancelled) => (JobPhase::Cancelled, self.progress.percent()),
            Err(_) => (JobPhase::Failed, self.progress.percent()),
        };
        let error = if result.is_ok() {
            None
        } else {
            self.shared.error()
        };

        match &result {
            Ok(()) => tracing::info!(job = %self.job.id, "download completed"),
            Err(e) => tracing::warn!(job = %self.job.id, status = %status, error = %e, "download did not complete"),
        }

        self.sink.notify(
            &self.job.id,
            StatusUpdate {
                progress: Some(progress),
                speed: Some(0.0),
                connection_mode: Some(self.shared.mode()),
                status: Some(status),
                error,
            },
        );

        result
    }

    fn notify(&self, update: StatusUpdate) {
        self.sink.notify(&self.job.id, update);
    }
}
