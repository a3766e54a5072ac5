//! Platform description consumed by the planner.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_core::{Result, TileError};
use tessera_kernels::Precision;

use crate::tiling::RESERVED_BYTES;

pub const DEFAULT_CORE_COUNT: usize = 40;
pub const DEFAULT_UB_SIZE_BYTES: usize = 192 * 1024;

/// Static description of the target processor.
///
/// Missing JSON fields take the defaults below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Vector cores available to one launch.
    pub core_count: usize,

    /// Per-core local working memory in bytes.
    pub ub_size_bytes: usize,

    /// Integer FloorMod strategy for every launch on this platform.
    pub precision: Precision,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            core_count: DEFAULT_CORE_COUNT,
            ub_size_bytes: DEFAULT_UB_SIZE_BYTES,
            precision: Precision::default(),
        }
    }
}

impl PlatformConfig {
    pub fn new(core_count: usize, ub_size_bytes: usize) -> Self {
        Self { core_count, ub_size_bytes, ..Self::default() }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Parse a JSON description and validate it.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| TileError::Config(format!("platform config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON description from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TileError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.core_count == 0 {
            return Err(TileError::Config("core_count must be at least 1".into()));
        }
        if self.ub_size_bytes <= RESERVED_BYTES {
            return Err(TileError::Config(format!(
                "ub_size_bytes ({}) must exceed the {RESERVED_BYTES}-byte reserved region",
                self.ub_size_bytes
            )));
        }
        Ok(())
    }

    /// Bytes of each core's working memory available to slots and scratch.
    pub fn arena_bytes(&self) -> usize {
        self.ub_size_bytes.saturating_sub(RESERVED_BYTES)
    }
}
