use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::DownloadError;
use crate::planner::Segment;
use crate::progress::ProgressAggregator;
use crate::state::SharedState;

const BACKOFF_CAP_SECS: u64 = 10;

/// Outcome of one download attempt for a segment.
enum Attempt {
    Done,
    Cancelled,
    /// Transient failure worth another attempt.
    Retry(String),
    /// Structural failure; retrying cannot succeed.
    Fatal(String),
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(BACKOFF_CAP_SECS))
}

/// Downloads exactly one byte range into a dedicated part file.
///
/// The worker owns its part file exclusively; the only shared state it
/// touches is the progress counter and, on permanent failure, the job
/// error. Failures never cross the task boundary: a worker that gives up
/// records its error through [`SharedState::fail`], which also stops the
/// other workers, because one unrecoverable segment invalidates the whole
/// multi-connection attempt.
pub struct SegmentWorker {
    client: Client,
    url: String,
    bearer_token: Option<String>,
    segment: Segment,
    part_path: PathBuf,
    chunk_size: usize,
    retries: u32,
    shared: Arc<SharedState>,
    progress: Arc<ProgressAggregator>,
}

impl SegmentWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        url: String,
        bearer_token: Option<String>,
        segment: Segment,
        part_path: PathBuf,
        chunk_size: usize,
        retries: u32,
        shared: Arc<SharedState>,
        progress: Arc<ProgressAggregator>,
    ) -> Self {
        Self {
            client,
            url,
            bearer_token,
            segment,
            part_path,
            chunk_size,
            retries,
            shared,
            progress,
        }
    }

    /// Retry loop: up to `retries` attempts with exponential backoff.
    /// The cancellation flag is checked before every attempt; the attempt
    /// itself checks it before every chunk write.
    pub async fn run(self) {
        let index = self.segment.index;
        let mut attempt = 0u32;
        loop {
            if self.shared.is_cancelled() {
                return;
            }
            match self.attempt_once().await {
                Attempt::Done => {
                    tracing::debug!(segment = index, "segment complete");
                    return;
                }
                Attempt::Cancelled => return,
                Attempt::Fatal(reason) => {
                    tracing::error!(segment = index, %reason, "segment failed permanently");
                    self.shared.fail(reason);
                    return;
                }
                Attempt::Retry(reason) => {
                    attempt += 1;
                    if attempt >= self.retries {
                        let reason = DownloadError::SegmentExhausted {
                            index,
                            attempts: attempt,
                            reason,
                        }
                        .to_string();
                        tracing::error!(segment = index, %reason, "retry budget exhausted");
                        self.shared.fail(reason);
                        return;
                    }
                    tracing::warn!(
                        segment = index,
                        attempt,
                        max = self.retries,
                        %reason,
                        "segment attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff(attempt)).await;
                }
            }
        }
    }

    async fn attempt_once(&self) -> Attempt {
        let range = format!("bytes={}-{}", self.segment.start, self.segment.end);
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(format!("request failed: {}", e)),
        };

        // A range rejection means the plan and the server disagree about
        // the resource; no retry can fix that.
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Attempt::Fatal(
                DownloadError::RangeNotSatisfiable {
                    start: self.segment.start,
                    end: self.segment.end,
                }
                .to_string(),
            );
        }
        if !response.status().is_success() {
            return Attempt::Retry(format!("server returned {}", response.status()));
        }

        let file = match File::create(&self.part_path).await {
            Ok(file) => file,
            Err(e) => return Attempt::Retry(format!("cannot create part file: {}", e)),
        };
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            if self.shared.is_cancelled() {
                // The incomplete part is never merged; counted bytes stay
                // as the job's last-known progress.
                return Attempt::Cancelled;
            }
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return self.retry_after(written, format!("read failed: {}", e)),
            };
            if let Err(e) = writer.write_all(&bytes).await {
                return self.retry_after(written, format!("write failed: {}", e));
            }
            written += bytes.len() as u64;
            self.progress.add(bytes.len() as u64);
        }

        if let Err(e) = writer.flush().await {
            return self.retry_after(written, format!("flush failed: {}", e));
        }

        // A short read is not a success; rewriting the part from scratch
        // is the only safe recovery.
        let expected = self.segment.len();
        if written != expected {
            return self.retry_after(
                written,
                format!("size mismatch, expected {} bytes, got {}", expected, written),
            );
        }

        Attempt::Done
    }

    /// Rolls back this attempt's byte count before signalling a retry, so
    /// the aggregate matches the bytes held in completed part files.
    fn retry_after(&self, written: u64, reason: String) -> Attempt {
        if written > 0 {
            self.progress.rollback(written);
        }
        Attempt::Retry(reason)
    }
}
