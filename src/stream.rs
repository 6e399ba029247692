use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::DownloadError;
use crate::progress::ProgressAggregator;
use crate::state::SharedState;

/// Downloads the whole resource as one uninterrupted stream straight to
/// the final output path.
///
/// Used whenever multi-connection preconditions are not met. There is no
/// internal retry: with no cheaper alternative path left, a failure here
/// is terminal for the job. On cancellation the partial output file is
/// left in place for the orchestrator's cleanup to remove.
pub async fn stream_to_output(
    client: &Client,
    url: &str,
    bearer_token: Option<&str>,
    output_path: &Path,
    chunk_size: usize,
    shared: &Arc<SharedState>,
    progress: &ProgressAggregator,
) -> Result<(), DownloadError> {
    let mut request = client.get(url);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?.error_for_status()?;

    // Multi-connection mode was already ruled out; a size learned this
    // late only improves progress reporting.
    if shared.total() == 0 {
        if let Some(size) = response.content_length().filter(|&n| n > 0) {
            tracing::debug!(size, "size learned from fallback response");
            shared.set_total(size);
        }
    }

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = File::create(output_path).await?;
    let mut writer = BufWriter::with_capacity(chunk_size, file);
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        if shared.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let bytes = chunk?;
        writer.write_all(&bytes).await?;
        written += bytes.len() as u64;
        progress.add(bytes.len() as u64);
    }
    writer.flush().await?;

    let total = shared.total();
    if total > 0 && written != total {
        tracing::warn!(
            expected = total,
            actual = written,
            "fallback stream delivered a different byte count than advertised"
        );
    }

    Ok(())
}
