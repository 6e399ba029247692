use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Transfer strategy chosen for a job. Set once after probing and
/// observable for the rest of the job's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Strategy not decided yet.
    Unknown,
    /// One uninterrupted streamed transfer.
    Single,
    /// Concurrent segment workers over disjoint byte ranges.
    Multi(u32),
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Unknown => write!(f, "N/A"),
            ConnectionMode::Single => write!(f, "Single"),
            ConnectionMode::Multi(n) => write!(f, "Multi ({})", n),
        }
    }
}

impl Serialize for ConnectionMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle phase of a download job.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Probing,
    Planning,
    Downloading,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled
        )
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Probing => "probing",
            JobPhase::Planning => "planning",
            JobPhase::Downloading => "downloading",
            JobPhase::Merging => "merging",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
            JobPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Sparse status update sent to the manager boundary.
///
/// Every field is optional; only the fields that changed are populated.
/// The struct is a value snapshot, never shared by reference across tasks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_mode: Option<ConnectionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn phase(status: JobPhase) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn mode(mode: ConnectionMode) -> Self {
        Self {
            connection_mode: Some(mode),
            ..Self::default()
        }
    }

    pub fn transfer(progress: f64, speed: f64) -> Self {
        Self {
            progress: Some(progress),
            speed: Some(speed),
            ..Self::default()
        }
    }
}

/// Tunable parameters for a download job.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Requested number of concurrent segment connections.
    pub connections: usize,
    /// File-side buffering granularity for part writes and merge copies.
    pub chunk_size: usize,
    /// Total deadline for the metadata probe request.
    pub probe_timeout: Duration,
    /// Stall detection between chunks of an active transfer.
    pub read_timeout: Duration,
    /// Connection establishment deadline.
    pub connect_timeout: Duration,
    /// Files at or below this size are downloaded with a single stream.
    pub multi_threshold: u64,
    /// Attempts per segment before the job is abandoned.
    pub segment_retries: u32,
    /// Minimum interval between progress notifications.
    pub status_interval: Duration,
    /// How often the orchestrator checks workers and cancellation.
    pub poll_interval: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connections: 4,
            chunk_size: 1024 * 1024,
            probe_timeout: Duration::from_secs(25),
            read_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            multi_threshold: 10 * 1024 * 1024,
            segment_retries: 3,
            status_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Immutable description of one download job.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Identifier used to namespace the temp directory and status updates.
    pub id: String,
    pub url: String,
    pub output_path: PathBuf,
    /// Size hint from the caller; authoritative total once resolved.
    pub known_size: Option<u64>,
    /// Bearer token attached to every outbound request.
    pub bearer_token: Option<String>,
    pub options: DownloadOptions,
}

impl DownloadJob {
    pub fn new(id: impl Into<String>, url: impl Into<String>, output_path: PathBuf) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            output_path,
            known_size: None,
            bearer_token: None,
            options: DownloadOptions::default(),
        }
    }

    /// Directory holding this job's part files, a sibling of the output
    /// file. The job id keeps concurrent jobs with the same output name
    /// from colliding.
    pub fn temp_dir(&self) -> PathBuf {
        let name = self
            .output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let parent = self
            .output_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        parent.join(format!(".{}.parts_{}", name, self.id))
    }
}
