use std::path::PathBuf;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const DEFAULT_MEMORY_CAPACITY: usize = 65_536;
pub const DEFAULT_SORT_THRESHOLD: usize = 65_536;
pub const DEFAULT_BLOCK_SIZE: usize = 100_000;
pub const DEFAULT_FLUSH_BATCH: usize = 5_000;
pub const DEFAULT_READ_AHEAD: usize = 256;

/// Tuning knobs for sets, sorting and cursors.
///
/// Every field has a default, so a partial document deserializes fine:
/// `{"memory_capacity": 1024}` keeps everything else as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Elements a `HugeSet` keeps in memory before spilling the window.
    pub memory_capacity: usize,
    /// Above this many elements sorting goes through the merge sorter.
    pub sort_threshold: usize,
    /// Elements per sorted block during an external sort.
    pub block_size: usize,
    /// Merged elements buffered before appending to the result file.
    pub flush_batch: usize,
    /// Upper bound on elements a cursor pulls from its source at once.
    pub read_ahead: usize,
    /// Where spill files go. `None` means a fresh temporary directory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            sort_threshold: DEFAULT_SORT_THRESHOLD,
            block_size: DEFAULT_BLOCK_SIZE,
            flush_batch: DEFAULT_FLUSH_BATCH,
            read_ahead: DEFAULT_READ_AHEAD,
            spill_dir: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("memory_capacity", self.memory_capacity),
            ("sort_threshold", self.sort_threshold),
            ("block_size", self.block_size),
            ("flush_batch", self.flush_batch),
            ("read_ahead", self.read_ahead),
        ] {
            if value == 0 {
                bail!(Error::InvalidCapacity(name));
            }
        }
        Ok(())
    }

    pub fn with_memory_capacity(mut self, n: usize) -> Self {
        self.memory_capacity = n;
        self
    }

    pub fn with_sort_threshold(mut self, n: usize) -> Self {
        self.sort_threshold = n;
        self
    }

    pub fn with_block_size(mut self, n: usize) -> Self {
        self.block_size = n;
        self
    }

    pub fn with_flush_batch(mut self, n: usize) -> Self {
        self.flush_batch = n;
        self
    }

    pub fn with_read_ahead(mut self, n: usize) -> Self {
        self.read_ahead = n;
        self
    }

    pub fn with_spill_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }
}
