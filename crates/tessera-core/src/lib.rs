//! # tessera-core
//!
//! Foundation types for the Tessera tiling runtime.
//!
//! Provides:
//! - `DType` catalogue with per-element widths (f16, bf16, f32, i32, bool)
//! - `Shape` with overflow-checked flattening to an element count
//! - `Buffer`: flat host-side byte storage standing in for global memory
//! - `TileError`: the planning/runtime error taxonomy

pub mod dtype;
pub mod error;
pub mod shape;
pub mod storage;

pub use dtype::DType;
pub use error::TileError;
pub use shape::Shape;
pub use storage::Buffer;

pub type Result<T> = std::result::Result<T, TileError>;
