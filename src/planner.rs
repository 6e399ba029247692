use std::path::{Path, PathBuf};

/// One contiguous inclusive byte range of the resource, owned by exactly
/// one worker. Immutable once planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Part files are named by segment index so merge order is
    /// unambiguous regardless of completion order.
    pub fn part_file(&self, temp_dir: &Path) -> PathBuf {
        temp_dir.join(format!("part_{}", self.index))
    }
}

/// Partitions `[0, total_size)` into `connections` contiguous ranges of
/// `total_size / connections` bytes each, the last range absorbing the
/// remainder so the partition is exact.
///
/// Returns an empty plan when multi-connection mode cannot work: a single
/// connection, an unknown size, or a file so small a range would be
/// empty. The caller falls back to one streamed transfer.
pub fn plan(total_size: u64, connections: usize) -> Vec<Segment> {
    if total_size == 0 || connections <= 1 {
        return Vec::new();
    }
    let span = total_size / connections as u64;
    if span == 0 {
        return Vec::new();
    }

    let mut segments = Vec::with_capacity(connections);
    let mut start = 0u64;
    for index in 0..connections {
        let end = if index == connections - 1 {
            total_size - 1
        } else {
            start + span - 1
        };
        segments.push(Segment { index, start, end });
        start = end + 1;
    }
    segments
}
