use smallvec::SmallVec;
use std::fmt;

use crate::{Result, TileError};

/// Tensor shape with stack-allocated storage for ≤4 dimensions.
///
/// The runtime only ever needs the flattened element count, so apart from
/// construction and display this is a thin wrapper around `numel`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    /// Create a new shape from dimensions.
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Get dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Flattened element count; a scalar holds one element.
    ///
    /// Saturates on overflow. Use `checked_numel` when the shape comes from
    /// outside the process.
    pub fn numel(&self) -> usize {
        self.dims.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    /// Flattened element count, failing on `usize` overflow.
    pub fn checked_numel(&self) -> Result<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| TileError::ShapeOverflow(self.dims.to_vec()))
    }

    /// Fail with `ShapeMismatch` unless `other` has identical dimensions.
    pub fn ensure_same(&self, other: &Shape) -> Result<()> {
        if self != other {
            return Err(TileError::ShapeMismatch {
                expected: self.dims.to_vec(),
                got: other.dims.to_vec(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

macro_rules! impl_shape_from_array {
    ($($n:expr),*) => {
        $(
            impl From<[usize; $n]> for Shape {
                fn from(dims: [usize; $n]) -> Self {
                    Shape::new(&dims)
                }
            }
        )*
    };
}

impl_shape_from_array!(0, 1, 2, 3, 4, 5, 6);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let s = Shape::new(&[]);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.checked_numel(), Ok(1));
    }

    #[test]
    fn test_numel() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.checked_numel(), Ok(24));
    }

    #[test]
    fn test_zero_dim_is_empty() {
        let s = Shape::new(&[16, 0, 8]);
        assert_eq!(s.numel(), 0);
        assert_eq!(s.checked_numel(), Ok(0));
    }

    #[test]
    fn test_overflow() {
        let s = Shape::new(&[usize::MAX, 2]);
        assert_eq!(s.numel(), usize::MAX);
        assert!(matches!(s.checked_numel(), Err(TileError::ShapeOverflow(_))));
    }

    #[test]
    fn test_ensure_same() {
        let a: Shape = [2, 3].into();
        let b: Shape = [2, 3].into();
        let c: Shape = [3, 2].into();
        assert!(a.ensure_same(&b).is_ok());
        assert_eq!(
            a.ensure_same(&c),
            Err(TileError::ShapeMismatch { expected: vec![2, 3], got: vec![3, 2] })
        );
    }

    #[test]
    fn test_display() {
        let s: Shape = [1, 2, 3].into();
        assert_eq!(s.to_string(), "[1, 2, 3]");
        assert_eq!(format!("{:?}", s), "Shape([1, 2, 3])");
    }
}
