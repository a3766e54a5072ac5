use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Element types understood by the tiling runtime.
///
/// Only the types some kernel actually consumes or produces are listed;
/// `Bool` is the one-byte-per-element mask written by FiniteMask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 16-bit Brain Float (same exponent range as F32, reduced mantissa)
    BF16,
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 32-bit signed integer
    I32,
    /// Boolean mask, one byte per element (0 or 1)
    Bool,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::Bool => 1,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    /// Short lowercase tag, matching `Display` and `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::I32 => "i32",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f16" | "float16" | "half" => Ok(DType::F16),
            "bf16" | "bfloat16" => Ok(DType::BF16),
            "f32" | "float32" | "float" => Ok(DType::F32),
            "i32" | "int32" => Ok(DType::I32),
            "bool" => Ok(DType::Bool),
            other => Err(format!("unknown dtype '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::F16.element_size(), 2);
        assert_eq!(DType::BF16.element_size(), 2);
        assert_eq!(DType::F32.element_size(), 4);
        assert_eq!(DType::I32.element_size(), 4);
        assert_eq!(DType::Bool.element_size(), 1);
    }

    #[test]
    fn test_storage_bytes() {
        assert_eq!(DType::F32.storage_bytes(10), 40);
        assert_eq!(DType::F16.storage_bytes(3), 6);
        assert_eq!(DType::Bool.storage_bytes(0), 0);
    }

    #[test]
    fn test_parse_and_display() {
        for dt in [DType::F16, DType::BF16, DType::F32, DType::I32, DType::Bool] {
            assert_eq!(dt.to_string().parse::<DType>(), Ok(dt));
        }
        assert_eq!("float16".parse::<DType>(), Ok(DType::F16));
        assert!("f64".parse::<DType>().is_err());
    }
}
