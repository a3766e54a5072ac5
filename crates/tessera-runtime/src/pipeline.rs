//! Per-core copy-in / compute / copy-out loop.
//!
//! ```text
//! Idle ──run──► Running ──► Done
//!                  │
//!                  └──fault──► Aborted
//! ```
//!
//! Double-buffered timeline:
//! ```text
//! set 0:  [IN 0][COMPUTE 0][OUT 0]      [COMPUTE 2][OUT 2]
//! set 1:        [IN 1     ][COMPUTE 1  ][OUT 1]
//!                          [IN 2     ]
//! ```

use serde::Serialize;
use tessera_core::{Result, TileError};
use tessera_kernels::ComputeKernel;

use crate::arena::Arena;
use crate::buffer::{BufferDepth, BufferOrchestrator, OutputWindow};
use crate::tiling::TilingDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Idle,
    Running,
    Done,
    Aborted,
}

/// Completion signal from one core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreReport {
    pub core: usize,
    pub state: PipelineState,
    pub offset: usize,
    pub elems: usize,
    pub iterations: usize,
    pub depth: BufferDepth,
}

/// Drives one core through its assigned range exactly once.
pub struct PipelineDriver {
    core: usize,
    kernel: &'static dyn ComputeKernel,
    state: PipelineState,
}

impl PipelineDriver {
    pub fn new(core: usize, kernel: &'static dyn ComputeKernel) -> Self {
        Self { core, kernel, state: PipelineState::Idle }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Decode the descriptor, claim this core's range and process it.
    ///
    /// Any transfer or compute failure leaves the driver `Aborted`; there is
    /// no retry and nothing already written is rolled back here (the
    /// launcher discards the whole output).
    pub fn run<'g>(
        &mut self,
        descriptor: &[u8],
        arena: Arena,
        inputs: &[&'g [u8]],
        output: OutputWindow<'g>,
    ) -> Result<CoreReport> {
        if self.state != PipelineState::Idle {
            return Err(TileError::Config(format!(
                "core {} pipeline already ran ({:?})",
                self.core, self.state
            )));
        }
        self.state = PipelineState::Running;

        match self.execute(descriptor, arena, inputs, output) {
            Ok(mut report) => {
                self.state = PipelineState::Done;
                report.state = PipelineState::Done;
                Ok(report)
            }
            Err(e) => {
                self.state = PipelineState::Aborted;
                tracing::warn!(core = self.core, error = %e, "core aborted");
                Err(e)
            }
        }
    }

    fn execute<'g>(
        &self,
        descriptor: &[u8],
        arena: Arena,
        inputs: &[&'g [u8]],
        output: OutputWindow<'g>,
    ) -> Result<CoreReport> {
        let core = self.core;
        let descriptor = TilingDescriptor::from_bytes(descriptor)?;
        let range = descriptor.core_range(core).ok_or_else(|| TileError::HardwareFault {
            core,
            msg: format!("no range for core {core} in a {}-core descriptor", descriptor.core_count),
        })?;
        let usable = descriptor.usable();
        if usable == 0 {
            return Err(TileError::HardwareFault { core, msg: "descriptor has a zero chunk size".into() });
        }

        let iterations = descriptor.iterations(range.count);
        let mut report = CoreReport {
            core,
            state: PipelineState::Running,
            offset: range.offset,
            elems: range.count,
            iterations,
            depth: BufferDepth::for_assignment(range.count, usable),
        };
        if iterations == 0 {
            return Ok(report);
        }

        let mut slots = BufferOrchestrator::new(core, self.kernel, arena, usable, range.count, inputs, output)?;
        report.depth = slots.depth();

        let chunk = |i: usize| {
            let start = i * usable;
            (range.offset + start, usable.min(range.count - start))
        };

        match slots.depth() {
            BufferDepth::Single => {
                for i in 0..iterations {
                    let (offset, count) = chunk(i);
                    tracing::trace!(core, iteration = i, offset, count, "pipeline step");
                    let padded = slots.copy_in(0, offset, count)?;
                    slots.compute(0, padded)?;
                    slots.copy_out(0, offset, count)?;
                }
            }
            BufferDepth::Double => {
                let (offset, count) = chunk(0);
                let mut padded = slots.copy_in(0, offset, count)?;
                for i in 0..iterations {
                    let set = i % 2;
                    let (offset, count) = chunk(i);
                    tracing::trace!(core, iteration = i, offset, count, set, "pipeline step");
                    if i + 1 < iterations {
                        let (next_offset, next_count) = chunk(i + 1);
                        let next_padded = slots.compute_overlapped(set, padded, next_offset, next_count)?;
                        slots.copy_out(set, offset, count)?;
                        padded = next_padded;
                    } else {
                        slots.compute(set, padded)?;
                        slots.copy_out(set, offset, count)?;
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::compute_tiling;
    use tessera_kernels::{kernel_for, KernelKey};

    const NO_INPUT: &[u8] = &[];

    fn floor_mod_bytes(n: usize) -> (Vec<u8>, Vec<u8>) {
        let x1: Vec<i32> = (0..n as i32).map(|v| v * 7 - 1000).collect();
        let x2: Vec<i32> = (0..n as i32).map(|v| v % 13 + 1).collect();
        (bytemuck::cast_slice(&x1).to_vec(), bytemuck::cast_slice(&x2).to_vec())
    }

    #[test]
    fn test_single_buffered_run() {
        let kernel = kernel_for(KernelKey::FloorModI32Exact);
        let (x1, x2) = floor_mod_bytes(1000);
        let d = compute_tiling(1000, 1, 192 * 1024, 4, 32).unwrap();
        let mut out = vec![0u8; 4000];

        let mut driver = PipelineDriver::new(0, kernel);
        assert_eq!(driver.state(), PipelineState::Idle);
        let report = driver
            .run(&d.to_bytes(), Arena::new(184 * 1024), &[x1.as_slice(), x2.as_slice()], OutputWindow::new(0, &mut out))
            .unwrap();
        assert_eq!(driver.state(), PipelineState::Done);
        assert_eq!(report.state, PipelineState::Done);
        assert_eq!(report.depth, BufferDepth::Single);
        assert_eq!(report.iterations, 1);

        let y: Vec<i32> = bytemuck::pod_collect_to_vec(&out);
        assert_eq!(y[0], (-1000i32).rem_euclid(1));
        assert_eq!(y[5], (5 * 7 - 1000i32).rem_euclid(6));
    }

    #[test]
    fn test_double_buffered_run() {
        let kernel = kernel_for(KernelKey::FloorModI32Exact);
        let n = 1000;
        let (x1, x2) = floor_mod_bytes(n);
        // 8 KiB arena at 32 bytes/elem -> 256 elements per iteration
        let d = compute_tiling(n, 1, 16 * 1024, 4, 32).unwrap();
        assert_eq!(d.usable(), 256);
        let mut out = vec![0u8; n * 4];

        let mut driver = PipelineDriver::new(0, kernel);
        let report = driver
            .run(&d.to_bytes(), Arena::new(8 * 1024), &[x1.as_slice(), x2.as_slice()], OutputWindow::new(0, &mut out))
            .unwrap();
        assert_eq!(report.depth, BufferDepth::Double);
        assert_eq!(report.iterations, 4);

        let y: Vec<i32> = bytemuck::pod_collect_to_vec(&out);
        let expected: Vec<i32> = (0..n as i32).map(|v| (v * 7 - 1000).rem_euclid(v % 13 + 1)).collect();
        assert_eq!(y, expected);
    }

    #[test]
    fn test_empty_range_is_done() {
        let kernel = kernel_for(KernelKey::FiniteMaskF16);
        let d = compute_tiling(0, 4, 192 * 1024, 2, 10).unwrap();
        let mut driver = PipelineDriver::new(0, kernel);
        let report = driver
            .run(&d.to_bytes(), Arena::new(0), &[NO_INPUT], OutputWindow::new(0, &mut []))
            .unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(driver.state(), PipelineState::Done);
    }

    #[test]
    fn test_second_run_rejected() {
        let kernel = kernel_for(KernelKey::FiniteMaskF16);
        let d = compute_tiling(0, 4, 192 * 1024, 2, 10).unwrap();
        let mut driver = PipelineDriver::new(0, kernel);
        driver.run(&d.to_bytes(), Arena::new(0), &[NO_INPUT], OutputWindow::new(0, &mut [])).unwrap();
        let err = driver
            .run(&d.to_bytes(), Arena::new(0), &[NO_INPUT], OutputWindow::new(0, &mut []))
            .unwrap_err();
        assert!(matches!(err, TileError::Config(_)));
        assert_eq!(driver.state(), PipelineState::Done);
    }

    #[test]
    fn test_out_of_range_descriptor_aborts() {
        let kernel = kernel_for(KernelKey::FloorModI32Fast);
        let (x1, x2) = floor_mod_bytes(128);
        let mut d = compute_tiling(128, 1, 192 * 1024, 4, 32).unwrap();
        d.total_elems = 4096;
        d.last_core_elems = 4096;
        let mut out = vec![0u8; 128 * 4];

        let mut driver = PipelineDriver::new(0, kernel);
        let err = driver
            .run(&d.to_bytes(), Arena::new(184 * 1024), &[x1.as_slice(), x2.as_slice()], OutputWindow::new(0, &mut out))
            .unwrap_err();
        assert!(matches!(err, TileError::HardwareFault { core: 0, .. }));
        assert_eq!(driver.state(), PipelineState::Aborted);
    }

    #[test]
    fn test_oversized_chunk_aborts() {
        let kernel = kernel_for(KernelKey::FloorModI32Exact);
        let (x1, x2) = floor_mod_bytes(1000);
        let mut d = compute_tiling(1000, 1, 192 * 1024, 4, 32).unwrap();
        // claims a chunk far larger than the 8 KiB arena can slot
        d.usable_chunk_elems = 1 << 20;
        let mut out = vec![0u8; 4000];

        let mut driver = PipelineDriver::new(0, kernel);
        let err = driver
            .run(&d.to_bytes(), Arena::new(8 * 1024), &[x1.as_slice(), x2.as_slice()], OutputWindow::new(0, &mut out))
            .unwrap_err();
        assert!(matches!(err, TileError::HardwareFault { core: 0, .. }));
        assert!(err.is_runtime());
        assert_eq!(driver.state(), PipelineState::Aborted);
    }

    #[test]
    fn test_missing_core_and_bad_record() {
        let kernel = kernel_for(KernelKey::FiniteMaskF32);
        let d = compute_tiling(64, 1, 192 * 1024, 4, 13).unwrap();

        let mut driver = PipelineDriver::new(5, kernel);
        let err = driver.run(&d.to_bytes(), Arena::new(1024), &[NO_INPUT], OutputWindow::new(0, &mut [])).unwrap_err();
        assert!(matches!(err, TileError::HardwareFault { core: 5, .. }));

        let mut driver = PipelineDriver::new(0, kernel);
        let err = driver.run(&[0u8; 12], Arena::new(1024), &[NO_INPUT], OutputWindow::new(0, &mut [])).unwrap_err();
        assert!(matches!(err, TileError::Config(_)));
        assert_eq!(driver.state(), PipelineState::Aborted);
    }
}
