//! Static work partition across cores and iterations.
//!
//! Wire record (little-endian, no padding):
//! ```text
//! ┌──────────────────────────────┐
//! │ usable_chunk_elems  u32      │  0
//! │ core_count          u32      │  4
//! │ total_elems         u64      │  8
//! │ per_core_elems      u64      │ 16
//! │ tail_core_count     u64      │ 24
//! │ last_core_elems     u64      │ 32
//! └──────────────────────────────┘ 40
//! ```

use serde::{Deserialize, Serialize};
use tessera_core::{Result, TileError};

/// Alignment unit in elements. Every per-core count except the last core's
/// and every slot is a multiple of this.
pub const ALIGN: usize = 64;

/// Working-memory bytes held back from tiling on every core.
pub const RESERVED_BYTES: usize = 8 * 1024;

/// Minimum bytes of work worth giving one core.
pub const MIN_BYTES_PER_CORE: usize = 8 * 1024;

/// Fixed system workspace reserved once per launch.
pub const WORKSPACE_BYTES: usize = 16 * 1024;

/// Size of the serialized descriptor.
pub const DESCRIPTOR_BYTES: usize = 40;

/// Partition of one tensor, computed once on the host and handed to every
/// core as a serialized copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilingDescriptor {
    /// Max elements per iteration; bounds every iteration's working set.
    pub usable_chunk_elems: u32,
    pub core_count: u32,
    pub total_elems: u64,
    /// Baseline per-core count before tail adjustment.
    pub per_core_elems: u64,
    /// The first `tail_core_count` cores each take one extra `ALIGN` block.
    pub tail_core_count: u64,
    /// Count for the globally last core (baseline plus sub-`ALIGN` residue).
    pub last_core_elems: u64,
}

/// Contiguous element range owned by one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRange {
    pub core: usize,
    pub offset: usize,
    pub count: usize,
}

impl CoreRange {
    pub fn end(&self) -> usize {
        self.offset + self.count
    }
}

#[inline]
pub fn align_down(n: usize) -> usize {
    n / ALIGN * ALIGN
}

#[inline]
pub fn align_up(n: usize) -> usize {
    n.div_ceil(ALIGN) * ALIGN
}

/// Smallest amount of work a core is given before another core is enlisted.
pub fn min_elems_per_core(elem_width: usize) -> usize {
    (MIN_BYTES_PER_CORE / elem_width.max(1)).max(ALIGN)
}

/// Elements per iteration that fit `mem_budget_bytes` once the reserved
/// region is removed and each element is charged `temp_multiplier` bytes.
///
/// Clamped up to one `ALIGN` block when the budget is tiny; the arena then
/// rejects the allocation before the first iteration.
pub fn usable_chunk_elems(mem_budget_bytes: usize, temp_multiplier: usize) -> usize {
    let usable = align_down(mem_budget_bytes.saturating_sub(RESERVED_BYTES) / temp_multiplier.max(1));
    usable.clamp(ALIGN, align_down(u32::MAX as usize))
}

/// Partition `total_elems` across at most `core_budget` cores.
///
/// `temp_multiplier` is the working-memory bytes one element costs per
/// iteration (all slots of all buffer sets plus scratch).
pub fn compute_tiling(
    total_elems: usize,
    core_budget: usize,
    mem_budget_bytes: usize,
    elem_width: usize,
    temp_multiplier: usize,
) -> Result<TilingDescriptor> {
    if core_budget == 0 {
        return Err(TileError::Config("core budget must be at least 1".into()));
    }
    if mem_budget_bytes <= RESERVED_BYTES {
        return Err(TileError::Config(format!(
            "working memory of {mem_budget_bytes} bytes does not exceed the {RESERVED_BYTES}-byte reserved region"
        )));
    }
    if elem_width == 0 {
        return Err(TileError::Config("element width must be non-zero".into()));
    }
    if temp_multiplier == 0 {
        return Err(TileError::Config("temp multiplier must be non-zero".into()));
    }

    let usable = usable_chunk_elems(mem_budget_bytes, temp_multiplier);

    let cores = total_elems
        .div_ceil(min_elems_per_core(elem_width))
        .clamp(1, core_budget);
    let core_count = u32::try_from(cores)
        .map_err(|_| TileError::Config(format!("core count {cores} does not fit u32")))?;

    let per_core = align_down(total_elems / cores);
    let remainder = total_elems - per_core * cores;
    let tail = remainder / ALIGN;
    let residue = remainder % ALIGN;

    let descriptor = TilingDescriptor {
        usable_chunk_elems: usable as u32,
        core_count,
        total_elems: total_elems as u64,
        per_core_elems: per_core as u64,
        tail_core_count: tail as u64,
        last_core_elems: (per_core + residue) as u64,
    };

    tracing::debug!(
        total = total_elems,
        cores,
        usable,
        per_core,
        tail,
        last = per_core + residue,
        "tiling computed"
    );
    Ok(descriptor)
}

impl TilingDescriptor {
    /// Range owned by `core`, or `None` past `core_count` or when the record
    /// describes offsets that overflow `usize`.
    pub fn core_range(&self, core: usize) -> Option<CoreRange> {
        let cores = self.core_count as u64;
        let i = core as u64;
        if i >= cores {
            return None;
        }
        let per = self.per_core_elems;
        let bumped = per.checked_add(ALIGN as u64)?;
        let tail = self.tail_core_count;

        let offset = if i < tail {
            i.checked_mul(bumped)?
        } else {
            bumped.checked_mul(tail)?.checked_add(per.checked_mul(i - tail)?)?
        };
        let count = if i + 1 == cores {
            self.last_core_elems
        } else if i < tail {
            bumped
        } else {
            per
        };

        Some(CoreRange {
            core,
            offset: usize::try_from(offset).ok()?,
            count: usize::try_from(count).ok()?,
        })
    }

    /// All core ranges in core order.
    pub fn core_ranges(&self) -> impl Iterator<Item = CoreRange> + '_ {
        (0..self.core_count as usize).map_while(|i| self.core_range(i))
    }

    pub fn usable(&self) -> usize {
        self.usable_chunk_elems as usize
    }

    /// Iterations a core with `count` elements runs.
    pub fn iterations(&self, count: usize) -> usize {
        count.div_ceil(self.usable().max(1))
    }

    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_BYTES] {
        let mut out = [0u8; DESCRIPTOR_BYTES];
        out[0..4].copy_from_slice(&self.usable_chunk_elems.to_le_bytes());
        out[4..8].copy_from_slice(&self.core_count.to_le_bytes());
        out[8..16].copy_from_slice(&self.total_elems.to_le_bytes());
        out[16..24].copy_from_slice(&self.per_core_elems.to_le_bytes());
        out[24..32].copy_from_slice(&self.tail_core_count.to_le_bytes());
        out[32..40].copy_from_slice(&self.last_core_elems.to_le_bytes());
        out
    }

    /// Decode a record. Only the length is checked; a record that does not
    /// match the buffers it is run against faults at transfer time.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DESCRIPTOR_BYTES {
            return Err(TileError::Config(format!(
                "tiling record must be {DESCRIPTOR_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(b)
        };
        Ok(Self {
            usable_chunk_elems: u32_at(0),
            core_count: u32_at(4),
            total_elems: u64_at(8),
            per_core_elems: u64_at(16),
            tail_core_count: u64_at(24),
            last_core_elems: u64_at(32),
        })
    }
}
