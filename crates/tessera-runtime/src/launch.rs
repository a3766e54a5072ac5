//! Operator planning and the SPMD launch.
//!
//! Planning validates operands, resolves the kernel once and computes the
//! tiling. Launching hands every core the serialized descriptor, a private
//! arena and a disjoint window of the output, then runs all cores on the
//! rayon pool. The output is returned only if every core finishes.

use rayon::prelude::*;
use serde::Serialize;
use smallvec::SmallVec;
use tessera_core::{Buffer, DType, Result, Shape, TileError};
use tessera_kernels::{kernel_for, resolve, ComputeKernel, KernelKey, OpKind};

use crate::arena::Arena;
use crate::buffer::{BufferDepth, OutputWindow};
use crate::config::PlatformConfig;
use crate::pipeline::{CoreReport, PipelineDriver};
use crate::tiling::{compute_tiling, TilingDescriptor, ALIGN, WORKSPACE_BYTES};

/// Everything a launch needs, fixed on the host before any core runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorPlan {
    pub op: OpKind,
    #[serde(serialize_with = "serialize_key")]
    pub kernel: KernelKey,
    pub shape: Vec<usize>,
    pub input_dtype: DType,
    pub output_dtype: DType,
    pub descriptor: TilingDescriptor,
    /// Working-memory bytes one element costs per iteration.
    pub temp_multiplier: usize,
    /// Per-core arena size (working memory minus the reserved region).
    pub arena_bytes: usize,
    /// System workspace the host reserves for the launch.
    pub workspace_bytes: usize,
}

fn serialize_key<S: serde::Serializer>(key: &KernelKey, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u32(key.tiling_key())
}

impl OperatorPlan {
    pub fn total_elems(&self) -> usize {
        self.descriptor.total_elems as usize
    }

    pub fn core_count(&self) -> usize {
        self.descriptor.core_count as usize
    }

    /// Buffer depth each core will use, in core order.
    pub fn depths(&self) -> Vec<BufferDepth> {
        let usable = self.descriptor.usable();
        self.descriptor
            .core_ranges()
            .map(|r| BufferDepth::for_assignment(r.count, usable))
            .collect()
    }
}

/// Result of a launch in which every core reached `Done`.
#[derive(Debug)]
pub struct LaunchOutput {
    pub output: Buffer,
    pub reports: Vec<CoreReport>,
}

/// Bytes of working memory per element per iteration: both slot sets plus
/// the kernel's scratch.
pub fn temp_multiplier(kernel: &dyn ComputeKernel) -> usize {
    2 * kernel.io_bytes_per_elem() + kernel.scratch_bytes_per_elem()
}

/// Plan FloorMod over two operands of identical shape and dtype.
pub fn plan_floor_mod(x1: &Buffer, x2: &Buffer, platform: &PlatformConfig) -> Result<OperatorPlan> {
    x1.shape().ensure_same(x2.shape())?;
    if x1.dtype() != x2.dtype() {
        return Err(TileError::UnsupportedDType { op: OpKind::FloorMod.name(), dtype: x2.dtype() });
    }
    plan_op(OpKind::FloorMod, x1.shape(), x1.dtype(), platform)
}

/// Plan FiniteMask of `x` into an output of `out_shape`.
pub fn plan_finite_mask(x: &Buffer, out_shape: &Shape, platform: &PlatformConfig) -> Result<OperatorPlan> {
    x.shape().ensure_same(out_shape)?;
    plan_op(OpKind::FiniteMask, x.shape(), x.dtype(), platform)
}

/// Plan `op` for a tensor of `shape` and `dtype` without binding buffers.
pub fn plan_op(op: OpKind, shape: &Shape, dtype: DType, platform: &PlatformConfig) -> Result<OperatorPlan> {
    platform.validate()?;
    let total = shape.checked_numel()?;
    let key = resolve(op, dtype, platform.precision)?;
    let kernel = kernel_for(key);
    let temp = temp_multiplier(kernel);

    let descriptor = compute_tiling(
        total,
        platform.core_count,
        platform.ub_size_bytes,
        dtype.element_size(),
        temp,
    )?;

    let arena_bytes = platform.arena_bytes();
    if descriptor.usable() * temp > arena_bytes {
        return Err(TileError::Config(format!(
            "{} bytes of working memory cannot hold one {ALIGN}-element block of {:?} ({} bytes)",
            arena_bytes,
            key,
            ALIGN * temp
        )));
    }

    tracing::debug!(
        op = %op,
        ?key,
        total,
        cores = descriptor.core_count,
        usable = descriptor.usable(),
        temp,
        "operator planned"
    );

    Ok(OperatorPlan {
        op,
        kernel: key,
        shape: shape.dims().to_vec(),
        input_dtype: kernel.input_dtype(),
        output_dtype: kernel.output_dtype(),
        descriptor,
        temp_multiplier: temp,
        arena_bytes,
        workspace_bytes: WORKSPACE_BYTES,
    })
}

/// Run `plan` over `inputs` on every planned core.
///
/// All or nothing: the output buffer comes back only if every core
/// finished; otherwise the fault of the lowest-numbered failing core.
pub fn launch(plan: &OperatorPlan, inputs: &[&Buffer]) -> Result<LaunchOutput> {
    let kernel = kernel_for(plan.kernel);
    if inputs.len() != kernel.num_inputs() {
        return Err(TileError::Config(format!(
            "{} takes {} inputs, got {}",
            plan.op,
            kernel.num_inputs(),
            inputs.len()
        )));
    }
    let shape = Shape::from(plan.shape.clone());
    for input in inputs {
        if input.dtype() != plan.input_dtype {
            return Err(TileError::UnsupportedDType { op: plan.op.name(), dtype: input.dtype() });
        }
        shape.ensure_same(input.shape())?;
    }

    let ranges: Vec<_> = plan.descriptor.core_ranges().collect();
    if ranges.len() != plan.core_count() {
        return Err(TileError::Config(format!(
            "descriptor yields {} core ranges for {} cores",
            ranges.len(),
            plan.core_count()
        )));
    }

    let mut output = Buffer::zeros(plan.output_dtype, shape)?;
    let wire = plan.descriptor.to_bytes();
    let input_bytes: SmallVec<[&[u8]; 2]> = inputs.iter().map(|b| b.as_bytes()).collect();

    tracing::info!(
        op = %plan.op,
        kernel = ?plan.kernel,
        total = plan.total_elems(),
        cores = ranges.len(),
        "launch started"
    );

    let out_width = plan.output_dtype.element_size();
    let mut rest = output.as_bytes_mut();
    let mut windows = Vec::with_capacity(ranges.len());
    for range in &ranges {
        let take = range.count.saturating_mul(out_width).min(rest.len());
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(take);
        windows.push(OutputWindow::new(range.offset, head));
        rest = tail;
    }

    let arena_bytes = plan.arena_bytes;
    let results: Vec<Result<CoreReport>> = windows
        .into_par_iter()
        .enumerate()
        .map(|(core, window)| {
            let mut driver = PipelineDriver::new(core, kernel);
            driver.run(&wire, Arena::new(arena_bytes), &input_bytes, window)
        })
        .collect();

    let reports = match results.into_iter().collect::<Result<Vec<_>>>() {
        Ok(reports) => reports,
        Err(e) => {
            tracing::warn!(op = %plan.op, error = %e, "launch aborted");
            return Err(e);
        }
    };

    tracing::info!(op = %plan.op, cores = reports.len(), "launch complete");
    Ok(LaunchOutput { output, reports })
}
