//! # tessera-runtime
//!
//! Plans and executes elementwise kernels across a simulated many-core
//! vector processor.
//!
//! Provides:
//! - `tiling`: the static partition of a tensor across cores and iterations,
//!   plus its fixed little-endian wire record
//! - `config`: platform description (core count, working-memory size,
//!   FloorMod precision)
//! - `arena` / `buffer`: per-core working memory and the single/double
//!   buffered slot sets carved from it
//! - `pipeline`: the per-core copy-in / compute / copy-out state machine
//! - `launch`: operator planning and the all-or-nothing SPMD launch
//!
//! ```text
//! host:   plan_floor_mod ──► OperatorPlan ──► launch
//!                                              │  descriptor bytes
//!                  ┌──────────────┬────────────┴───┐
//! cores:      PipelineDriver  PipelineDriver  PipelineDriver
//!              (arena 0)       (arena 1)       (arena N-1)
//! ```

pub mod arena;
pub mod buffer;
pub mod config;
pub mod launch;
pub mod pipeline;
pub mod tiling;

pub use config::PlatformConfig;
pub use launch::{launch, plan_finite_mask, plan_floor_mod, LaunchOutput, OperatorPlan};
pub use pipeline::{CoreReport, PipelineDriver, PipelineState};
pub use tiling::{compute_tiling, CoreRange, TilingDescriptor};
