pub mod engine;
pub mod error;
pub mod merge;
pub mod models;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod state;
pub mod stream;
pub mod worker;

/// Convenient re-exports of the commonly used types.
pub mod prelude {
    pub use crate::engine::{DownloadEngine, JobHandle};
    pub use crate::error::DownloadError;
    pub use crate::models::{
        ConnectionMode, DownloadJob, DownloadOptions, JobPhase, StatusUpdate,
    };
    pub use crate::progress::{NoopSink, StatusSink};
}
