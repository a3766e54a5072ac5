//! Per-core working memory.
//!
//! Pre-allocates one contiguous buffer per core and bump-allocates slot
//! regions from it before the pipeline starts. Nothing is allocated inside
//! the iteration loop.

use tessera_core::{Result, TileError};

/// Alignment of every region, in bytes.
pub const ARENA_ALIGN: usize = 64;

/// Byte range handed out by `Arena::alloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

impl Region {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Bump-pointer arena over `u64` words so region starts are at least
/// 8-byte aligned in host memory.
pub struct Arena {
    buf: Vec<u64>,
    capacity: usize,
    offset: usize,
}

impl Arena {
    /// Create an arena with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u64; capacity.div_ceil(8)],
            capacity,
            offset: 0,
        }
    }

    /// Reserve `nbytes` at the next aligned offset.
    pub fn alloc(&mut self, nbytes: usize) -> Result<Region> {
        let aligned = align_up(self.offset, ARENA_ALIGN);
        let end = aligned
            .checked_add(nbytes)
            .filter(|&end| end <= self.capacity)
            .ok_or_else(|| {
                TileError::Config(format!(
                    "working memory exhausted: {nbytes} bytes requested at offset {aligned}, capacity {}",
                    self.capacity
                ))
            })?;
        self.offset = end;
        Ok(Region { offset: aligned, len: nbytes })
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let capacity = self.capacity;
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.buf)[..capacity]
    }

    pub fn region(&self, r: Region) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.buf)[r.offset..r.end()]
    }

    pub fn region_mut(&mut self, r: Region) -> &mut [u8] {
        &mut self.bytes_mut()[r.offset..r.end()]
    }

    /// Mutable views of several regions at once.
    ///
    /// Regions must be sorted by offset and non-overlapping; returns `None`
    /// otherwise.
    pub fn disjoint_mut<const N: usize>(&mut self, regions: [Region; N]) -> Option<[&mut [u8]; N]> {
        let mut cursor = 0;
        for r in &regions {
            if r.offset < cursor || r.end() > self.capacity {
                return None;
            }
            cursor = r.end();
        }

        let mut rest = self.bytes_mut();
        let mut consumed = 0;
        Some(std::array::from_fn(|i| {
            let r = regions[i];
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(r.offset - consumed);
            let (head, tail) = tail.split_at_mut(r.len);
            rest = tail;
            consumed = r.end();
            head
        }))
    }

    /// Reset the arena for reuse. Does not deallocate.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Current bytes used.
    pub fn used(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}
