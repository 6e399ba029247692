use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use parget::prelude::*;

#[derive(Parser)]
#[command(name = "parget", about = "Multi-connection HTTP downloader")]
struct Args {
    /// Source URL
    url: String,

    /// Destination file path
    #[arg(short, long)]
    output: PathBuf,

    /// Number of concurrent connections
    #[arg(short, long, default_value_t = 4)]
    connections: usize,

    /// Bearer token sent with every request
    #[arg(long)]
    token: Option<String>,

    /// Expected file size in bytes, when known upfront
    #[arg(long)]
    size: Option<u64>,

    /// Job identifier; defaults to the current process id
    #[arg(long)]
    job_id: Option<String>,
}

/// Prints each sparse status update as a JSON line, standing in for the
/// manager that would normally consume them.
struct PrintSink;

impl StatusSink for PrintSink {
    fn notify(&self, job_id: &str, update: StatusUpdate) {
        if let Ok(json) = serde_json::to_string(&update) {
            println!("[{}] {}", job_id, json);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parget=info".into()),
        )
        .init();

    let args = Args::parse();

    let job_id = args
        .job_id
        .unwrap_or_else(|| std::process::id().to_string());
    let mut job = DownloadJob::new(job_id, args.url, args.output);
    job.known_size = args.size;
    job.bearer_token = args.token;
    job.options.connections = args.connections;

    let engine = DownloadEngine::new(job, Arc::new(PrintSink))?;

    let handle = engine.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, cancelling");
            handle.cancel();
        }
    });

    match engine.run().await {
        Ok(()) => Ok(()),
        Err(DownloadError::Cancelled) => {
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}
