//! # tessera-kernels
//!
//! Per-(operator, dtype) compute strategies that run on one working-memory
//! slot at a time.
//!
//! Provides:
//! - FloorMod: a fast f32-widening variant and an exact split-dividend
//!   variant for i32
//! - FiniteMask: `|x| < inf` as a one-byte boolean mask
//! - `registry`: resolves (operator, dtype, precision) to a `KernelKey` once
//!   at planning time and maps keys to `&'static dyn ComputeKernel`
//!
//! Kernels see only raw byte slots; the runtime owns transfers.

pub mod finite_mask;
pub mod floor_mod;
pub mod kernel;
pub mod registry;

pub use kernel::{ComputeKernel, KernelError, KernelKey, OpKind, Precision};
pub use registry::{kernel_for, resolve};
