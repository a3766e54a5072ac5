//! Working-memory slot sets and the transfers between them and global
//! memory.
//!
//! ```text
//! arena:  [ set 0: in0 | in1 | out ][ set 1: in0 | in1 | out ][ scratch ]
//!                                    └─ only when double-buffered
//! ```
//!
//! With two sets, iteration i computes on one set while iteration i+1's
//! inputs are loaded into the other.

use smallvec::SmallVec;
use tessera_core::{Result, TileError};
use tessera_kernels::ComputeKernel;

use crate::arena::{Arena, Region, ARENA_ALIGN};
use crate::tiling::align_up;

/// Number of slot sets a core cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferDepth {
    Single,
    Double,
}

impl BufferDepth {
    /// Single when the whole assignment fits one iteration.
    pub fn for_assignment(count: usize, usable: usize) -> Self {
        if count <= usable {
            BufferDepth::Single
        } else {
            BufferDepth::Double
        }
    }

    pub fn sets(&self) -> usize {
        match self {
            BufferDepth::Single => 1,
            BufferDepth::Double => 2,
        }
    }
}

/// The part of global output one core may write, starting at element `base`.
pub struct OutputWindow<'g> {
    base: usize,
    bytes: &'g mut [u8],
}

impl<'g> OutputWindow<'g> {
    pub fn new(base: usize, bytes: &'g mut [u8]) -> Self {
        Self { base, bytes }
    }
}

/// Byte layout of one slot set; identical for every set of a core.
#[derive(Debug, Clone, Copy)]
struct SlotLayout {
    num_inputs: usize,
    slot_elems: usize,
    in_width: usize,
    out_width: usize,
    input_bytes: usize,
    output_offset: usize,
    set_bytes: usize,
}

impl SlotLayout {
    fn new(kernel: &dyn ComputeKernel, slot_elems: usize) -> Self {
        let num_inputs = kernel.num_inputs();
        let in_width = kernel.input_dtype().element_size();
        let out_width = kernel.output_dtype().element_size();
        let input_bytes = align_up_bytes(slot_elems * in_width);
        let output_offset = num_inputs * input_bytes;
        Self {
            num_inputs,
            slot_elems,
            in_width,
            out_width,
            input_bytes,
            output_offset,
            set_bytes: output_offset + align_up_bytes(slot_elems * out_width),
        }
    }

    fn input<'s>(&self, set: &'s [u8], i: usize) -> &'s [u8] {
        &set[i * self.input_bytes..(i + 1) * self.input_bytes]
    }
}

fn align_up_bytes(n: usize) -> usize {
    n.div_ceil(ARENA_ALIGN) * ARENA_ALIGN
}

fn fault(core: usize, msg: impl Into<String>) -> TileError {
    TileError::HardwareFault { core, msg: msg.into() }
}

/// Owns one core's arena and moves data between slot sets and global
/// memory.
pub struct BufferOrchestrator<'g> {
    core: usize,
    kernel: &'static dyn ComputeKernel,
    arena: Arena,
    depth: BufferDepth,
    layout: SlotLayout,
    sets: SmallVec<[Region; 2]>,
    scratch: Region,
    inputs: SmallVec<[&'g [u8]; 2]>,
    output: OutputWindow<'g>,
}

impl<'g> BufferOrchestrator<'g> {
    /// Carve slot sets for a core assigned `count` elements, at most
    /// `usable` per iteration.
    ///
    /// Fails with `HardwareFault` if the slots do not fit the arena; the
    /// planner rejects such layouts, so only a bad descriptor gets here.
    pub fn new(
        core: usize,
        kernel: &'static dyn ComputeKernel,
        mut arena: Arena,
        usable: usize,
        count: usize,
        inputs: &[&'g [u8]],
        output: OutputWindow<'g>,
    ) -> Result<Self> {
        if inputs.len() != kernel.num_inputs() {
            return Err(TileError::Config(format!(
                "{:?} takes {} inputs, {} bound",
                kernel.key(),
                kernel.num_inputs(),
                inputs.len()
            )));
        }

        let depth = BufferDepth::for_assignment(count, usable);
        let slot_elems = match depth {
            BufferDepth::Single => align_up(count),
            BufferDepth::Double => align_up(usable),
        };
        let layout = SlotLayout::new(kernel, slot_elems);

        let alloc_fault = |e: TileError| fault(core, format!("slot allocation: {e}"));
        arena.reset();
        let mut sets = SmallVec::new();
        for _ in 0..depth.sets() {
            sets.push(arena.alloc(layout.set_bytes).map_err(alloc_fault)?);
        }
        let scratch = arena
            .alloc(slot_elems * kernel.scratch_bytes_per_elem())
            .map_err(alloc_fault)?;

        tracing::debug!(
            core,
            ?depth,
            slot_elems,
            used = arena.used(),
            capacity = arena.capacity(),
            "slots allocated"
        );

        Ok(Self {
            core,
            kernel,
            arena,
            depth,
            layout,
            sets,
            scratch,
            inputs: inputs.iter().copied().collect(),
            output,
        })
    }

    pub fn depth(&self) -> BufferDepth {
        self.depth
    }

    /// Elements one slot holds.
    pub fn slot_elems(&self) -> usize {
        self.layout.slot_elems
    }

    fn set_region(&self, set: usize) -> Result<Region> {
        self.sets
            .get(set)
            .copied()
            .ok_or_else(|| TileError::Config(format!("slot set {set} not allocated ({:?})", self.depth)))
    }

    /// Load `count` elements at global `offset` into `set`, zero-padding to
    /// the alignment boundary. Returns the padded count.
    pub fn copy_in(&mut self, set: usize, offset: usize, count: usize) -> Result<usize> {
        let region = self.set_region(set)?;
        let dst = self.arena.region_mut(region);
        load_slots(self.core, dst, &self.layout, &self.inputs, offset, count)
    }

    /// Run the kernel over `padded` elements of `set`.
    pub fn compute(&mut self, set: usize, padded: usize) -> Result<()> {
        let region = self.set_region(set)?;
        let [slots, scratch] = self
            .arena
            .disjoint_mut([region, self.scratch])
            .ok_or_else(|| TileError::Config("slot set overlaps scratch".into()))?;
        run_kernel(self.core, self.kernel, slots, scratch, &self.layout, padded)
    }

    /// Compute on `set` while loading the next chunk into the other set.
    /// Returns the padded count of the loaded chunk.
    pub fn compute_overlapped(
        &mut self,
        set: usize,
        padded: usize,
        next_offset: usize,
        next_count: usize,
    ) -> Result<usize> {
        if self.depth != BufferDepth::Double {
            return Err(TileError::Config("overlap needs two slot sets".into()));
        }
        let (core, kernel, layout) = (self.core, self.kernel, self.layout);
        let inputs = &self.inputs;
        let [s0, s1, scratch] = self
            .arena
            .disjoint_mut([self.sets[0], self.sets[1], self.scratch])
            .ok_or_else(|| TileError::Config("slot sets overlap".into()))?;
        let (current, next) = if set == 0 { (s0, s1) } else { (s1, s0) };

        let (computed, loaded) = rayon::join(
            || run_kernel(core, kernel, current, scratch, &layout, padded),
            || load_slots(core, next, &layout, inputs, next_offset, next_count),
        );
        computed?;
        loaded
    }

    /// Write exactly `count` elements of `set`'s output slot to global
    /// `offset`. Padding never leaves the core.
    pub fn copy_out(&mut self, set: usize, offset: usize, count: usize) -> Result<()> {
        let region = self.set_region(set)?;
        let src = self.arena.region(region);
        store_slot(self.core, src, &self.layout, &mut self.output, offset, count)
    }
}

fn load_slots(
    core: usize,
    set: &mut [u8],
    layout: &SlotLayout,
    inputs: &[&[u8]],
    offset: usize,
    count: usize,
) -> Result<usize> {
    if count > layout.slot_elems {
        return Err(fault(
            core,
            format!("chunk of {count} elements exceeds slot of {}", layout.slot_elems),
        ));
    }
    let padded = align_up(count);
    let w = layout.in_width;
    let end = offset
        .checked_add(count)
        .ok_or_else(|| fault(core, "copy-in range overflows"))?;

    for (i, input) in inputs.iter().enumerate() {
        let available = input.len() / w;
        if end > available {
            return Err(fault(
                core,
                format!("copy-in [{offset}, {end}) outside input {i} of {available} elements"),
            ));
        }
        let slot = &mut set[i * layout.input_bytes..(i + 1) * layout.input_bytes];
        slot[..count * w].copy_from_slice(&input[offset * w..end * w]);
        slot[count * w..padded * w].fill(0);
    }
    Ok(padded)
}

fn run_kernel(
    core: usize,
    kernel: &dyn ComputeKernel,
    set: &mut [u8],
    scratch: &mut [u8],
    layout: &SlotLayout,
    padded: usize,
) -> Result<()> {
    let (ins, out) = set.split_at_mut(layout.output_offset);
    let inputs: SmallVec<[&[u8]; 2]> = (0..layout.num_inputs).map(|i| layout.input(ins, i)).collect();
    kernel
        .compute(&inputs, out, scratch, padded)
        .map_err(|e| fault(core, format!("compute: {e}")))
}

fn store_slot(
    core: usize,
    set: &[u8],
    layout: &SlotLayout,
    output: &mut OutputWindow<'_>,
    offset: usize,
    count: usize,
) -> Result<()> {
    let w = layout.out_width;
    let window_elems = output.bytes.len() / w;
    let start = offset
        .checked_sub(output.base)
        .filter(|rel| rel + count <= window_elems)
        .ok_or_else(|| {
            fault(
                core,
                format!(
                    "copy-out [{offset}, {}) outside window [{}, {})",
                    offset + count,
                    output.base,
                    output.base + window_elems
                ),
            )
        })?;
    let src = &set[layout.output_offset..layout.output_offset + count * w];
    output.bytes[start * w..(start + count) * w].copy_from_slice(src);
    Ok(())
}
