//! Tunables for chunking, ingestion and extraction.

use serde::{Deserialize, Serialize};

/// Leaf and interior chunking parameters.
///
/// Leaves cut on a rolling hash over the byte stream; interior layers cut on
/// a fixed slice of each child's hash. `min_size == target_size == max_size`
/// selects fixed-size leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingOptions {
    /// Smallest leaf the chunker will cut (except the last one of a stream).
    pub min_size: u32,
    /// Expected leaf size.
    pub target_size: u32,
    /// Hard upper bound on leaf size.
    pub max_size: u32,
    /// Smallest number of children per interior node (except the last one of a layer).
    pub min_child_count: u32,
    /// Expected number of children per interior node.
    pub target_child_count: u32,
    /// Hard upper bound on children per interior node.
    pub max_child_count: u32,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            min_size: 16 * 1024,
            target_size: 64 * 1024,
            max_size: 256 * 1024,
            min_child_count: 2,
            target_child_count: 16,
            max_child_count: 64,
        }
    }
}

impl ChunkingOptions {
    /// Options that cut every `size` bytes.
    pub fn fixed(size: u32) -> Self {
        Self {
            min_size: size,
            target_size: size,
            max_size: size,
            ..Self::default()
        }
    }

    /// Whether leaves are cut at fixed offsets.
    pub fn is_fixed(&self) -> bool {
        self.min_size == self.max_size && self.target_size == self.max_size
    }

    /// Rolling-hash cut threshold: `2^32 / target_size`.
    pub fn leaf_threshold(&self) -> u64 {
        (1u64 << 32) / u64::from(self.target_size.max(1))
    }

    /// Interior slice cut threshold: `2^32 / target_child_count`.
    pub fn slice_threshold(&self) -> u64 {
        (1u64 << 32) / u64::from(self.target_child_count.max(1))
    }

    /// Check the ordering constraints between the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_size == 0 {
            return Err("min_size must be > 0".into());
        }
        if self.min_size > self.target_size || self.target_size > self.max_size {
            return Err(format!(
                "leaf sizes must satisfy min <= target <= max (got {} / {} / {})",
                self.min_size, self.target_size, self.max_size
            ));
        }
        if self.min_child_count < 2 {
            return Err("min_child_count must be >= 2".into());
        }
        if self.min_child_count > self.target_child_count
            || self.target_child_count > self.max_child_count
        {
            return Err(format!(
                "child counts must satisfy min <= target <= max (got {} / {} / {})",
                self.min_child_count, self.target_child_count, self.max_child_count
            ));
        }
        Ok(())
    }
}

/// Extraction pipeline sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Parallel fetch workers.
    pub fetch_workers: usize,
    /// Parallel write workers.
    pub write_workers: usize,
    /// Capacity of each inter-stage queue.
    pub queue_depth: usize,
    /// Maximum descriptors grouped into one fetch batch.
    pub batch_limit: usize,
    /// Interval in milliseconds between progress reports.
    pub progress_interval_ms: u64,
    /// Number of recent samples in the throughput moving average.
    pub throughput_window: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 4,
            write_workers: 4,
            queue_depth: 64,
            batch_limit: 16,
            progress_interval_ms: 1_000,
            throughput_window: 5,
        }
    }
}

impl ExtractConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.fetch_workers == 0 || self.write_workers == 0 {
            return Err("worker counts must be > 0".into());
        }
        if self.queue_depth == 0 || self.batch_limit == 0 {
            return Err("queue_depth and batch_limit must be > 0".into());
        }
        if self.throughput_window == 0 {
            return Err("throughput_window must be > 0".into());
        }
        Ok(())
    }
}

/// Bulk ingestion sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Parallel writer lanes.
    pub lanes: usize,
    /// Read buffer size when streaming files from disk.
    pub read_buffer_size: usize,
    /// Leaves fetched ahead when reading content back.
    pub read_ahead: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            read_buffer_size: 64 * 1024,
            read_ahead: 4,
        }
    }
}
