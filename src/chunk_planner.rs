//! Chunk Planner
//!
//! Splits a file size into the contiguous byte ranges uploaded one request each

use crate::error::{Result, UploadError};
use crate::models::ChunkRange;
use tracing::debug;

const MIB: u64 = 1024 * 1024;

// File size tiers for automatic chunk size selection
const SMALL_FILE_SIZE: u64 = 100 * MIB;
const MEDIUM_FILE_SIZE: u64 = 500 * MIB;
const LARGE_FILE_SIZE: u64 = 1024 * MIB;

/// Pick a chunk size for a file of `total_size` bytes
///
/// Smaller files get smaller chunks to bound the cost of a retry; larger
/// files get larger chunks to bound the number of requests.
pub fn chunk_size_for(total_size: u64) -> u64 {
    match total_size {
        s if s <= SMALL_FILE_SIZE => 2 * MIB,
        s if s <= MEDIUM_FILE_SIZE => 4 * MIB,
        s if s <= LARGE_FILE_SIZE => 8 * MIB,
        _ => 16 * MIB,
    }
}

/// Planner for splitting a file into chunk ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    chunk_size: u64,
}

impl ChunkPlanner {
    /// Create a new ChunkPlanner
    ///
    /// # Arguments
    /// * `chunk_size` - Size of each chunk in bytes, must be > 0
    pub fn new(chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(UploadError::ConfigError(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(ChunkPlanner { chunk_size })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Calculate the number of chunks needed for a file
    ///
    /// An empty file needs zero chunks.
    pub fn total_chunks(&self, total_size: u64) -> u64 {
        total_size.div_ceil(self.chunk_size)
    }

    /// Produce the chunk ranges covering `[0, total_size)`
    ///
    /// Ranges are generated lazily in ascending order; cloning the returned
    /// iterator before consuming it restarts the sequence. A `total_size` of
    /// zero yields no ranges at all.
    pub fn plan(&self, total_size: u64) -> ChunkRanges {
        debug!(
            "Planning chunks: total_size={}, chunk_size={}, chunks={}",
            total_size,
            self.chunk_size,
            self.total_chunks(total_size)
        );
        ChunkRanges {
            next_start: 0,
            total_size,
            chunk_size: self.chunk_size,
        }
    }
}

/// Lazy sequence of chunk ranges produced by [`ChunkPlanner::plan`]
#[derive(Debug, Clone)]
pub struct ChunkRanges {
    next_start: u64,
    total_size: u64,
    chunk_size: u64,
}

impl Iterator for ChunkRanges {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        if self.next_start >= self.total_size {
            return None;
        }

        let start = self.next_start;
        // Last range is truncated to total_size - 1
        let end = start
            .saturating_add(self.chunk_size - 1)
            .min(self.total_size - 1);
        self.next_start = end + 1;

        Some(ChunkRange { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_size - self.next_start.min(self.total_size))
            .div_ceil(self.chunk_size);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}
