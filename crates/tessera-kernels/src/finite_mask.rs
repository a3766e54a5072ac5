//! FiniteMask: one boolean byte per element, 1 when `|x| < inf`.
//!
//! NaN fails the comparison, so NaN and ±inf both map to 0.

use std::marker::PhantomData;

use tessera_core::DType;

use crate::kernel::{check_arity, lane, lane_mut, ComputeKernel, FloatLane, KernelError, KernelKey, Sealed};

#[inline]
pub fn is_finite_f32(x: f32) -> bool {
    x.abs() < f32::INFINITY
}

pub struct FiniteMask<T> {
    key: KernelKey,
    _lane: PhantomData<fn() -> T>,
}

impl<T> FiniteMask<T> {
    pub const fn new(key: KernelKey) -> Self {
        Self { key, _lane: PhantomData }
    }
}

impl<T: FloatLane> Sealed for FiniteMask<T> {}

impl<T: FloatLane> ComputeKernel for FiniteMask<T> {
    fn key(&self) -> KernelKey {
        self.key
    }

    fn input_dtype(&self) -> DType {
        T::DTYPE
    }

    fn output_dtype(&self) -> DType {
        DType::Bool
    }

    fn scratch_bytes_per_elem(&self) -> usize {
        // one widened f32 lane
        4
    }

    fn compute(
        &self,
        inputs: &[&[u8]],
        output: &mut [u8],
        scratch: &mut [u8],
        count: usize,
    ) -> Result<(), KernelError> {
        check_arity(self.key, inputs)?;
        let x = lane::<T>(inputs[0], count)?;
        let y = lane_mut::<u8>(output, count)?;
        let wide = lane_mut::<f32>(scratch, count)?;

        for (w, &v) in wide.iter_mut().zip(x) {
            *w = v.widen();
        }
        for (y, &w) in y.iter_mut().zip(wide.iter()) {
            *y = is_finite_f32(w) as u8;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::{bf16, f16};

    fn mask<T: FloatLane>(key: KernelKey, x: &[T]) -> Vec<u8> {
        let kernel = FiniteMask::<T>::new(key);
        let mut out = vec![0u8; x.len()];
        let mut scratch = vec![0f32; x.len()];
        kernel
            .compute(
                &[bytemuck::cast_slice::<T, u8>(x)],
                &mut out,
                bytemuck::cast_slice_mut(&mut scratch),
                x.len(),
            )
            .unwrap();
        out
    }

    #[test]
    fn test_f32_specials() {
        let x = [1.0f32, f32::INFINITY, f32::NEG_INFINITY, f32::NAN, -0.0, f32::MAX, f32::MIN_POSITIVE];
        assert_eq!(mask(KernelKey::FiniteMaskF32, &x), vec![1, 0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_f16_specials() {
        let x = [f16::from_f32(2.5), f16::INFINITY, f16::NAN, f16::MAX, f16::NEG_INFINITY];
        assert_eq!(mask(KernelKey::FiniteMaskF16, &x), vec![1, 0, 0, 1, 0]);
    }

    #[test]
    fn test_bf16_specials() {
        let x = [bf16::NEG_INFINITY, bf16::from_f32(-3.0e38), bf16::NAN];
        assert_eq!(mask(KernelKey::FiniteMaskBF16, &x), vec![0, 1, 0]);
    }

    #[test]
    fn test_output_is_bool() {
        let kernel = FiniteMask::<f16>::new(KernelKey::FiniteMaskF16);
        assert_eq!(kernel.output_dtype(), DType::Bool);
        assert_eq!(kernel.num_inputs(), 1);
        // 2 bytes in + 1 byte out
        assert_eq!(kernel.io_bytes_per_elem(), 3);
    }
}
