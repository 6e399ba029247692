use thiserror::Error;

/// Errors a download job can terminate with.
///
/// Transient network and I/O failures are retried at the segment level and
/// only surface here once a segment has exhausted its retry budget. The
/// structural and integrity variants are never retried.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server cannot satisfy range {start}-{end}")]
    RangeNotSatisfiable { start: u64, end: u64 },
    #[error("segment {index} failed after {attempts} attempts: {reason}")]
    SegmentExhausted {
        index: usize,
        attempts: u32,
        reason: String,
    },
    #[error("downloaded {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("merge integrity error: {0}")]
    MergeIntegrity(String),
    #[error("download cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}
