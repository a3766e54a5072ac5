use half::{bf16, f16};

use crate::{DType, Result, Shape, TileError};

/// Rust scalar types that map one-to-one onto a `DType`.
///
/// `u8` stands for `DType::Bool` (0 or 1 per element).
pub trait Element: bytemuck::Pod + Send + Sync {
    const DTYPE: DType;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
}

impl Element for u8 {
    const DTYPE: DType = DType::Bool;
}

/// Flat, contiguous host buffer standing in for a core-visible global
/// memory region.
///
/// Data is kept as raw bytes so transfers into working memory are plain
/// byte copies; typed views are produced only at the edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    data: Vec<u8>,
    dtype: DType,
    shape: Shape,
}

impl Buffer {
    /// Allocate a zero-filled buffer.
    pub fn zeros(dtype: DType, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        let numel = shape.checked_numel()?;
        Ok(Self {
            data: vec![0u8; dtype.storage_bytes(numel)],
            dtype,
            shape,
        })
    }

    /// Copy typed elements into a new buffer of the given shape.
    pub fn from_slice<T: Element>(data: &[T], shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        let numel = shape.checked_numel()?;
        if numel != data.len() {
            return Err(TileError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data: bytemuck::cast_slice(data).to_vec(),
            dtype: T::DTYPE,
            shape,
        })
    }

    /// One-dimensional buffer holding `data`.
    pub fn from_vec<T: Element>(data: Vec<T>) -> Self {
        let shape = Shape::new(&[data.len()]);
        Self {
            data: bytemuck::cast_slice(&data).to_vec(),
            dtype: T::DTYPE,
            shape,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy the contents out as typed elements.
    /// Returns None if `T` does not match the buffer dtype.
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if T::DTYPE != self.dtype {
            return None;
        }
        // pod_collect_to_vec copes with the byte vector's 1-byte alignment.
        Some(bytemuck::pod_collect_to_vec(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let b = Buffer::zeros(DType::F16, [4, 8]).unwrap();
        assert_eq!(b.shape().numel(), 32);
        assert_eq!(b.nbytes(), 64);
        assert!(b.as_bytes().iter().all(|&x| x == 0));
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let data = [1.5f32, -2.0, 3.25];
        let b = Buffer::from_slice(&data, [3]).unwrap();
        assert_eq!(b.dtype(), DType::F32);
        assert_eq!(b.to_vec::<f32>().unwrap(), data);
        assert!(b.to_vec::<i32>().is_none());
    }

    #[test]
    fn test_half_types() {
        let data = vec![f16::from_f32(0.5), f16::from_f32(-4.0)];
        let b = Buffer::from_vec(data.clone());
        assert_eq!(b.dtype(), DType::F16);
        assert_eq!(b.to_vec::<f16>().unwrap(), data);

        let data = vec![bf16::from_f32(1.0)];
        assert_eq!(Buffer::from_vec(data).dtype(), DType::BF16);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(Buffer::from_slice(&[1i32, 2, 3], [2, 2]).is_err());
        assert!(Buffer::from_slice(&[1i32, 2, 3, 4], [2, 2]).is_ok());
    }
}
