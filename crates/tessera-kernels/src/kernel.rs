//! Kernel trait, dispatch keys and slot helpers shared by every kernel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tessera_core::storage::Element;
use tessera_core::DType;

/// Operators the runtime knows how to tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    FloorMod,
    FiniteMask,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::FloorMod => "floor_mod",
            OpKind::FiniteMask => "finite_mask",
        }
    }

    /// Number of input operands.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::FloorMod => 2,
            OpKind::FiniteMask => 1,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "floor-mod" | "floor_mod" | "floormod" => Ok(OpKind::FloorMod),
            "finite-mask" | "finite_mask" | "isfinite" => Ok(OpKind::FiniteMask),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

/// Deployment-wide choice between the fast and the exact FloorMod path.
///
/// Only integer FloorMod has two implementations; float inputs always take
/// the widening path whichever value is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precision {
    HighPerformance,
    #[default]
    HighPrecision,
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high-performance" | "performance" | "fast" => Ok(Precision::HighPerformance),
            "high-precision" | "precision" | "exact" => Ok(Precision::HighPrecision),
            other => Err(format!("unknown precision '{other}'")),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::HighPerformance => f.write_str("high-performance"),
            Precision::HighPrecision => f.write_str("high-precision"),
        }
    }
}

/// One compiled (operator, dtype, variant) instantiation.
///
/// The discriminant is the numeric tiling key handed to every core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum KernelKey {
    FloorModF16 = 1,
    FloorModBF16 = 2,
    FloorModF32 = 3,
    FloorModI32Fast = 4,
    FloorModI32Exact = 5,
    FiniteMaskF16 = 11,
    FiniteMaskBF16 = 12,
    FiniteMaskF32 = 13,
}

impl KernelKey {
    pub const ALL: [KernelKey; 8] = [
        KernelKey::FloorModF16,
        KernelKey::FloorModBF16,
        KernelKey::FloorModF32,
        KernelKey::FloorModI32Fast,
        KernelKey::FloorModI32Exact,
        KernelKey::FiniteMaskF16,
        KernelKey::FiniteMaskBF16,
        KernelKey::FiniteMaskF32,
    ];

    pub fn tiling_key(&self) -> u32 {
        *self as u32
    }

    pub fn op(&self) -> OpKind {
        match self {
            KernelKey::FloorModF16
            | KernelKey::FloorModBF16
            | KernelKey::FloorModF32
            | KernelKey::FloorModI32Fast
            | KernelKey::FloorModI32Exact => OpKind::FloorMod,
            KernelKey::FiniteMaskF16 | KernelKey::FiniteMaskBF16 | KernelKey::FiniteMaskF32 => {
                OpKind::FiniteMask
            }
        }
    }
}

/// Failure inside a compute step. The runtime turns it into a
/// `HardwareFault` tagged with the core index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("{kernel:?} expects {expected} input slots, got {got}")]
    Arity { kernel: KernelKey, expected: usize, got: usize },

    #[error("slot holds {have} bytes, need {need}")]
    SlotTooSmall { have: usize, need: usize },

    #[error("slot is not aligned for {0}")]
    Misaligned(DType),
}

mod sealed {
    pub trait Sealed {}
}

pub(crate) use sealed::Sealed;

/// A compute strategy over one loaded working-memory slot set.
///
/// Sealed: the set of kernels is closed and enumerated by `KernelKey`.
pub trait ComputeKernel: Sealed + Send + Sync {
    fn key(&self) -> KernelKey;

    fn input_dtype(&self) -> DType;

    fn output_dtype(&self) -> DType;

    /// Working-memory bytes per element needed beyond the input/output slots.
    fn scratch_bytes_per_elem(&self) -> usize;

    /// Compute `count` elements from `inputs` into `output`.
    ///
    /// Slots may be longer than `count` elements (padding); only the first
    /// `count` output elements are meaningful.
    fn compute(
        &self,
        inputs: &[&[u8]],
        output: &mut [u8],
        scratch: &mut [u8],
        count: usize,
    ) -> Result<(), KernelError>;

    fn num_inputs(&self) -> usize {
        self.key().op().arity()
    }

    /// Bytes of input plus output slot per element.
    fn io_bytes_per_elem(&self) -> usize {
        self.num_inputs() * self.input_dtype().element_size() + self.output_dtype().element_size()
    }
}

pub(crate) fn check_arity(key: KernelKey, inputs: &[&[u8]]) -> Result<(), KernelError> {
    let expected = key.op().arity();
    if inputs.len() != expected {
        return Err(KernelError::Arity { kernel: key, expected, got: inputs.len() });
    }
    Ok(())
}

/// View the first `count` elements of a slot as `T`.
pub(crate) fn lane<T: Element>(slot: &[u8], count: usize) -> Result<&[T], KernelError> {
    let need = count * T::DTYPE.element_size();
    if slot.len() < need {
        return Err(KernelError::SlotTooSmall { have: slot.len(), need });
    }
    bytemuck::try_cast_slice(&slot[..need]).map_err(|_| KernelError::Misaligned(T::DTYPE))
}

/// Mutable view of the first `count` elements of a slot as `T`.
pub(crate) fn lane_mut<T: Element>(slot: &mut [u8], count: usize) -> Result<&mut [T], KernelError> {
    let need = count * T::DTYPE.element_size();
    if slot.len() < need {
        return Err(KernelError::SlotTooSmall { have: slot.len(), need });
    }
    bytemuck::try_cast_slice_mut(&mut slot[..need]).map_err(|_| KernelError::Misaligned(T::DTYPE))
}

/// Split scratch into two lanes of `count` elements each.
///
/// Both lane types must be four bytes wide so the second lane stays aligned.
pub(crate) fn split_lanes<A: Element, B: Element>(
    scratch: &mut [u8],
    count: usize,
) -> Result<(&mut [A], &mut [B]), KernelError> {
    let width_a = A::DTYPE.element_size();
    let need = count * (width_a + B::DTYPE.element_size());
    if scratch.len() < need {
        return Err(KernelError::SlotTooSmall { have: scratch.len(), need });
    }
    let (a, b) = scratch[..need].split_at_mut(count * width_a);
    let a = bytemuck::try_cast_slice_mut(a).map_err(|_| KernelError::Misaligned(A::DTYPE))?;
    let b = bytemuck::try_cast_slice_mut(b).map_err(|_| KernelError::Misaligned(B::DTYPE))?;
    Ok((a, b))
}

/// Float element types the vector unit widens to f32 before computing.
pub trait FloatLane: Element + Copy {
    fn widen(self) -> f32;
    fn narrow(v: f32) -> Self;
}

impl FloatLane for half::f16 {
    fn widen(self) -> f32 {
        self.to_f32()
    }
    fn narrow(v: f32) -> Self {
        half::f16::from_f32(v)
    }
}

impl FloatLane for half::bf16 {
    fn widen(self) -> f32 {
        self.to_f32()
    }
    fn narrow(v: f32) -> Self {
        half::bf16::from_f32(v)
    }
}

impl FloatLane for f32 {
    fn widen(self) -> f32 {
        self
    }
    fn narrow(v: f32) -> Self {
        v
    }
}
