//! Static dispatch table from `KernelKey` to kernel instance.
//!
//! Resolution happens once per launch on the host; cores only ever see the
//! numeric key.

use half::{bf16, f16};
use tessera_core::{DType, TileError};

use crate::finite_mask::FiniteMask;
use crate::floor_mod::{FloorModFloat, FloorModI32Exact, FloorModI32Fast};
use crate::kernel::{ComputeKernel, KernelKey, OpKind, Precision};

static FLOOR_MOD_F16: FloorModFloat<f16> = FloorModFloat::new(KernelKey::FloorModF16);
static FLOOR_MOD_BF16: FloorModFloat<bf16> = FloorModFloat::new(KernelKey::FloorModBF16);
static FLOOR_MOD_F32: FloorModFloat<f32> = FloorModFloat::new(KernelKey::FloorModF32);
static FLOOR_MOD_I32_FAST: FloorModI32Fast = FloorModI32Fast;
static FLOOR_MOD_I32_EXACT: FloorModI32Exact = FloorModI32Exact;
static FINITE_MASK_F16: FiniteMask<f16> = FiniteMask::new(KernelKey::FiniteMaskF16);
static FINITE_MASK_BF16: FiniteMask<bf16> = FiniteMask::new(KernelKey::FiniteMaskBF16);
static FINITE_MASK_F32: FiniteMask<f32> = FiniteMask::new(KernelKey::FiniteMaskF32);

/// Pick the kernel for an operator over `dtype`.
///
/// `precision` only matters for i32 FloorMod.
pub fn resolve(op: OpKind, dtype: DType, precision: Precision) -> Result<KernelKey, TileError> {
    let key = match (op, dtype) {
        (OpKind::FloorMod, DType::F16) => KernelKey::FloorModF16,
        (OpKind::FloorMod, DType::BF16) => KernelKey::FloorModBF16,
        (OpKind::FloorMod, DType::F32) => KernelKey::FloorModF32,
        (OpKind::FloorMod, DType::I32) => match precision {
            Precision::HighPerformance => KernelKey::FloorModI32Fast,
            Precision::HighPrecision => KernelKey::FloorModI32Exact,
        },
        (OpKind::FiniteMask, DType::F16) => KernelKey::FiniteMaskF16,
        (OpKind::FiniteMask, DType::BF16) => KernelKey::FiniteMaskBF16,
        (OpKind::FiniteMask, DType::F32) => KernelKey::FiniteMaskF32,
        (op, dtype) => return Err(TileError::UnsupportedDType { op: op.name(), dtype }),
    };
    Ok(key)
}

pub fn kernel_for(key: KernelKey) -> &'static dyn ComputeKernel {
    match key {
        KernelKey::FloorModF16 => &FLOOR_MOD_F16,
        KernelKey::FloorModBF16 => &FLOOR_MOD_BF16,
        KernelKey::FloorModF32 => &FLOOR_MOD_F32,
        KernelKey::FloorModI32Fast => &FLOOR_MOD_I32_FAST,
        KernelKey::FloorModI32Exact => &FLOOR_MOD_I32_EXACT,
        KernelKey::FiniteMaskF16 => &FINITE_MASK_F16,
        KernelKey::FiniteMaskBF16 => &FINITE_MASK_BF16,
        KernelKey::FiniteMaskF32 => &FINITE_MASK_F32,
    }
}
