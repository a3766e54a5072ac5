use crate::DType;

/// Errors raised while planning or executing a tiled launch.
///
/// Everything except `HardwareFault` is detected before any core starts.
/// A `HardwareFault` aborts the whole launch; there is no partial result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TileError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("element count of shape {0:?} overflows usize")]
    ShapeOverflow(Vec<usize>),

    #[error("unsupported dtype {dtype} for {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    #[error("hardware fault on core {core}: {msg}")]
    HardwareFault { core: usize, msg: String },
}

impl TileError {
    /// Whether the error was raised at runtime rather than during planning.
    pub fn is_runtime(&self) -> bool {
        matches!(self, TileError::HardwareFault { .. })
    }
}
