use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

use crate::error::DownloadError;
use crate::planner::Segment;

/// Concatenates completed part files into the final output file, in
/// ascending segment order regardless of worker completion order.
///
/// A missing part is diagnosed by cause: under cancellation a worker was
/// stopped early and the merge simply reports cancelled; with no
/// cancellation in effect a missing part is a defect and surfaces as a
/// merge integrity error. After writing, the output size must match the
/// expected total within a 1-byte tolerance.
pub async fn merge_parts(
    segments: &[Segment],
    temp_dir: &Path,
    output_path: &Path,
    expected_total: u64,
    cancelled: bool,
    chunk_size: usize,
) -> Result<(), DownloadError> {
    if segments.is_empty() {
        return Err(DownloadError::MergeIntegrity(
            "no part files to merge".to_string(),
        ));
    }

    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.index);

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let output = File::create(output_path).await?;
    let mut writer = BufWriter::with_capacity(chunk_size, output);

    for segment in ordered {
        let part_path = segment.part_file(temp_dir);
        if !part_path.exists() {
            if cancelled {
                return Err(DownloadError::Cancelled);
            }
            return Err(DownloadError::MergeIntegrity(format!(
                "missing part file for segment {}",
                segment.index
            )));
        }
        let part = File::open(&part_path).await?;
        let mut reader = BufReader::with_capacity(chunk_size, part);
        tokio::io::copy_buf(&mut reader, &mut writer).await?;
    }
    writer.flush().await?;

    let merged_size = tokio::fs::metadata(output_path).await?.len();
    if expected_total > 0 && merged_size.abs_diff(expected_total) > 1 {
        return Err(DownloadError::MergeIntegrity(format!(
            "merged size {} differs from expected {}",
            merged_size, expected_total
        )));
    }

    tracing::debug!(parts = segments.len(), merged_size, "merge complete");
    Ok(())
}
