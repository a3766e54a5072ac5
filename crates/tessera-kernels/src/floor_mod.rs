//! FloorMod: `y = x1 - x2 * floor(x1 / x2)`, sign follows the divisor.
//!
//! Two strategies:
//! - widening: operands go through f32 lanes (f16/bf16/f32 always, i32 when
//!   deployed for throughput). Integers above 2^24 lose precision here.
//! - exact i32: the dividend is split at 2^24 so every quantity handed to
//!   the f32 divider is either exactly representable or yields a quotient
//!   small enough that one multiply-subtract correction makes it exact.
//!
//! Special values on the float path:
//!
//! | x1        | x2        | y   |
//! |-----------|-----------|-----|
//! | finite    | ±inf      | x1  |
//! | ±inf      | any       | NaN |
//! | finite    | 0         | NaN (from the remainder, not special-cased) |

use std::marker::PhantomData;

use tessera_core::DType;

use crate::kernel::{
    check_arity, lane, lane_mut, split_lanes, ComputeKernel, FloatLane, KernelError, KernelKey,
    Sealed,
};

/// Split point for the exact integer path; values below it are exact in f32.
pub const SPLIT_SHIFT: u32 = 24;
const SPLIT: i64 = 1 << SPLIT_SHIFT;
const LOW_MASK: i32 = (1 << SPLIT_SHIFT) - 1;

/// Scalar FloorMod in f32.
///
/// The raw remainder is the exact truncated remainder, so a quotient that
/// overflows or exceeds 2^24 cannot leak rounding error into the result.
pub fn floor_mod_f32(x1: f32, x2: f32) -> f32 {
    let mut r = x1 % x2;
    if r != 0.0 && (r < 0.0) != (x2 < 0.0) {
        r += x2;
    }
    // Applied after sign correction so a negative x1 is not pushed to inf.
    if x2.is_infinite() && x1.is_finite() {
        r = x1;
    }
    if x1.is_infinite() {
        r = f32::NAN;
    }
    r
}

/// FloorMod on i32 through f32 lanes. Inexact once |x1| approaches 2^24.
pub fn floor_mod_i32_fast(x1: i32, x2: i32) -> i32 {
    narrow_i32(floor_mod_f32(x1 as f32, x2 as f32))
}

/// Exact FloorMod on i32 using only an approximate f32 divider.
///
/// A zero divisor is not special-cased; the reduction degenerates to the
/// identity and `x1` comes back unchanged.
pub fn floor_mod_i32_exact(x1: i32, x2: i32) -> i32 {
    let m = (x2 as i64).abs();
    exact_with_divisor(x1, x2, m, m as f32)
}

fn exact_with_divisor(x1: i32, x2: i32, m: i64, mf: f32) -> i32 {
    let r_lo = reduce((x1 & LOW_MASK) as i64, m, mf);
    fold_high(x1, r_lo, x2, m, mf)
}

/// Combine the high part of `x1` with the reduced low part and apply the
/// divisor's sign.
fn fold_high(x1: i32, r_lo: i64, x2: i32, m: i64, mf: f32) -> i32 {
    let hi = (x1 >> SPLIT_SHIFT) as i64;
    // x1 = hi * 2^24 + lo  ==  hi * (2^24 mod m) + (lo mod m)   (mod m)
    let r_split = reduce(SPLIT, m, mf);
    let mut r = reduce(hi * r_split + r_lo, m, mf);
    if x2 < 0 && r != 0 {
        r -= m;
    }
    r as i32
}

/// `v mod m` in `[0, m)` from one f32 quotient estimate and one correction.
///
/// Callers keep `|v / m|` below 2^24 (or `v` itself exact in f32) so the
/// estimate is off by at most one.
fn reduce(v: i64, m: i64, mf: f32) -> i64 {
    let q = ((v as f32) / mf).floor() as i64;
    let mut r = v.wrapping_sub(q.wrapping_mul(m));
    if r < 0 {
        r += m;
    } else if r >= m {
        r -= m;
    }
    r
}

fn narrow_i32(v: f32) -> i32 {
    v.round_ties_even() as i32
}

/// Widening FloorMod for f16, bf16 and f32.
pub struct FloorModFloat<T> {
    key: KernelKey,
    _lane: PhantomData<fn() -> T>,
}

impl<T> FloorModFloat<T> {
    pub const fn new(key: KernelKey) -> Self {
        Self { key, _lane: PhantomData }
    }
}

impl<T: FloatLane> Sealed for FloorModFloat<T> {}

impl<T: FloatLane> ComputeKernel for FloorModFloat<T> {
    fn key(&self) -> KernelKey {
        self.key
    }

    fn input_dtype(&self) -> DType {
        T::DTYPE
    }

    fn output_dtype(&self) -> DType {
        T::DTYPE
    }

    fn scratch_bytes_per_elem(&self) -> usize {
        // two f32 lanes: widened x1 (result in place) and widened x2
        8
    }

    fn compute(
        &self,
        inputs: &[&[u8]],
        output: &mut [u8],
        scratch: &mut [u8],
        count: usize,
    ) -> Result<(), KernelError> {
        check_arity(self.key, inputs)?;
        let x1 = lane::<T>(inputs[0], count)?;
        let x2 = lane::<T>(inputs[1], count)?;
        let y = lane_mut::<T>(output, count)?;
        let (a, b) = split_lanes::<f32, f32>(scratch, count)?;

        for (i, (&p, &q)) in x1.iter().zip(x2).enumerate() {
            a[i] = p.widen();
            b[i] = q.widen();
        }
        for (a, &b) in a.iter_mut().zip(b.iter()) {
            *a = floor_mod_f32(*a, b);
        }
        for (y, &a) in y.iter_mut().zip(a.iter()) {
            *y = T::narrow(a);
        }
        Ok(())
    }
}

/// i32 FloorMod through f32 lanes.
pub struct FloorModI32Fast;

impl Sealed for FloorModI32Fast {}

impl ComputeKernel for FloorModI32Fast {
    fn key(&self) -> KernelKey {
        KernelKey::FloorModI32Fast
    }

    fn input_dtype(&self) -> DType {
        DType::I32
    }

    fn output_dtype(&self) -> DType {
        DType::I32
    }

    fn scratch_bytes_per_elem(&self) -> usize {
        8
    }

    fn compute(
        &self,
        inputs: &[&[u8]],
        output: &mut [u8],
        scratch: &mut [u8],
        count: usize,
    ) -> Result<(), KernelError> {
        check_arity(self.key(), inputs)?;
        let x1 = lane::<i32>(inputs[0], count)?;
        let x2 = lane::<i32>(inputs[1], count)?;
        let y = lane_mut::<i32>(output, count)?;
        let (a, b) = split_lanes::<f32, f32>(scratch, count)?;

        for (i, (&p, &q)) in x1.iter().zip(x2).enumerate() {
            a[i] = p as f32;
            b[i] = q as f32;
        }
        for (a, &b) in a.iter_mut().zip(b.iter()) {
            *a = floor_mod_f32(*a, b);
        }
        for (y, &a) in y.iter_mut().zip(a.iter()) {
            *y = narrow_i32(a);
        }
        Ok(())
    }
}

/// Exact i32 FloorMod (split dividend, reciprocal estimate plus correction).
pub struct FloorModI32Exact;

impl Sealed for FloorModI32Exact {}

impl ComputeKernel for FloorModI32Exact {
    fn key(&self) -> KernelKey {
        KernelKey::FloorModI32Exact
    }

    fn input_dtype(&self) -> DType {
        DType::I32
    }

    fn output_dtype(&self) -> DType {
        DType::I32
    }

    fn scratch_bytes_per_elem(&self) -> usize {
        // f32 divisor lane + i32 low-part residue lane
        8
    }

    fn compute(
        &self,
        inputs: &[&[u8]],
        output: &mut [u8],
        scratch: &mut [u8],
        count: usize,
    ) -> Result<(), KernelError> {
        check_arity(self.key(), inputs)?;
        let x1 = lane::<i32>(inputs[0], count)?;
        let x2 = lane::<i32>(inputs[1], count)?;
        let y = lane_mut::<i32>(output, count)?;
        let (divisor, residue) = split_lanes::<f32, i32>(scratch, count)?;

        for (d, &q) in divisor.iter_mut().zip(x2) {
            *d = (q as i64).abs() as f32;
        }
        for i in 0..count {
            let m = (x2[i] as i64).abs();
            // lo < 2^24, so its residue always fits the i32 lane
            residue[i] = reduce((x1[i] & LOW_MASK) as i64, m, divisor[i]) as i32;
        }
        for i in 0..count {
            let m = (x2[i] as i64).abs();
            y[i] = fold_high(x1[i], residue[i] as i64, x2[i], m, divisor[i]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::{bf16, f16};

    fn reference(x1: i32, x2: i32) -> i32 {
        let (a, b) = (x1 as i64, x2 as i64);
        let r = a % b;
        let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
        r as i32
    }

    fn run<K: ComputeKernel>(kernel: &K, x1: &[u8], x2: &[u8], count: usize) -> Vec<u8> {
        let out_w = kernel.output_dtype().element_size();
        let mut out = vec![0u32; (count * out_w).div_ceil(4)];
        let mut scratch = vec![0u32; count * kernel.scratch_bytes_per_elem() / 4];
        let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        kernel
            .compute(&[x1, x2], out_bytes, bytemuck::cast_slice_mut(&mut scratch), count)
            .unwrap();
        out_bytes[..count * out_w].to_vec()
    }

    #[test]
    fn test_basic_signs() {
        assert_eq!(floor_mod_f32(7.0, 3.0), 1.0);
        assert_eq!(floor_mod_f32(-7.0, 3.0), 2.0);
        assert_eq!(floor_mod_f32(7.0, -3.0), -2.0);
        assert_eq!(floor_mod_f32(-7.0, -3.0), -1.0);
        assert_eq!(floor_mod_f32(6.0, 3.0), 0.0);
        assert_eq!(floor_mod_f32(5.5, 2.0), 1.5);
    }

    #[test]
    fn test_overflowing_quotient() {
        // 1e38 / 1e-38 is +inf in f32
        let y = floor_mod_f32(1e38, 1e-38);
        assert!(y.is_finite() && y >= 0.0 && y < 1e-38, "{y}");
        assert_eq!(y, 1e38f32 % 1e-38f32);

        let y = floor_mod_f32(-1e38, 1e-38);
        assert!(y.is_finite() && y >= 0.0 && y <= 1e-38, "{y}");

        // quotient finite but far above 2^24
        let y = floor_mod_f32(3e37, 7.0);
        assert!(y >= 0.0 && y < 7.0, "{y}");
        assert_eq!(y, y.trunc());

        assert_eq!(floor_mod_f32(-1e-30, 3.0), 3.0);
    }

    #[test]
    fn test_infinity_table() {
        assert_eq!(floor_mod_f32(3.5, f32::INFINITY), 3.5);
        assert_eq!(floor_mod_f32(-3.5, f32::INFINITY), -3.5);
        assert_eq!(floor_mod_f32(3.5, f32::NEG_INFINITY), 3.5);
        assert!(floor_mod_f32(f32::INFINITY, 2.0).is_nan());
        assert!(floor_mod_f32(f32::NEG_INFINITY, -2.0).is_nan());
        assert!(floor_mod_f32(f32::INFINITY, f32::INFINITY).is_nan());
        assert!(floor_mod_f32(f32::NAN, 2.0).is_nan());
        assert!(floor_mod_f32(1.0, 0.0).is_nan());
    }

    #[test]
    fn test_sign_follows_divisor() {
        for a in -40..=40 {
            for b in [-7, -3, -1, 1, 2, 5, 9] {
                let (x1, x2) = (a as f32 * 0.5, b as f32);
                let y = floor_mod_f32(x1, x2);
                assert!(y == 0.0 || (y < 0.0) == (x2 < 0.0), "{x1} mod {x2} = {y}");
                assert!(y.abs() < x2.abs(), "{x1} mod {x2} = {y}");
            }
        }
    }

    #[test]
    fn test_exact_i32_edges() {
        let values = [
            0,
            1,
            -1,
            7,
            -7,
            (1 << 24) - 1,
            1 << 24,
            (1 << 24) + 1,
            -(1 << 24) - 1,
            1_000_000_007,
            -1_000_000_007,
            i32::MAX,
            i32::MIN,
            i32::MIN + 1,
        ];
        let divisors = [1, -1, 2, -2, 3, 7, -13, 65_537, (1 << 24) + 3, -(1 << 30), i32::MAX, i32::MIN];
        for &a in &values {
            for &b in &divisors {
                assert_eq!(floor_mod_i32_exact(a, b), reference(a, b), "{a} mod {b}");
            }
        }
    }

    #[test]
    fn test_fast_i32_small_values() {
        for a in (-1000..1000).step_by(37) {
            for b in [-11, -4, 3, 8, 97] {
                assert_eq!(floor_mod_i32_fast(a, b), reference(a, b), "{a} mod {b}");
            }
        }
    }

    #[test]
    fn test_fast_i32_loses_precision() {
        let (a, b) = ((1 << 30) + 1, 3);
        assert_eq!(floor_mod_i32_exact(a, b), 2);
        assert_ne!(floor_mod_i32_fast(a, b), 2);
    }

    #[test]
    fn test_zero_divisor_not_special_cased() {
        assert_eq!(floor_mod_i32_exact(12345, 0), 12345);
        assert_eq!(floor_mod_i32_fast(12345, 0), 0);
    }

    #[test]
    fn test_float_kernel_f16() {
        let x1: Vec<f16> = [5.0f32, -5.0, 7.5, 1.0].iter().map(|&v| f16::from_f32(v)).collect();
        let x2: Vec<f16> = [3.0f32, 3.0, -2.0, f32::INFINITY].iter().map(|&v| f16::from_f32(v)).collect();
        let kernel = FloorModFloat::<f16>::new(KernelKey::FloorModF16);
        let out = run(&kernel, bytemuck::cast_slice(&x1), bytemuck::cast_slice(&x2), 4);
        let y: Vec<f32> = bytemuck::pod_collect_to_vec::<u8, f16>(&out).iter().map(|v| v.to_f32()).collect();
        assert_eq!(y, vec![2.0, 1.0, -0.5, 1.0]);
    }

    #[test]
    fn test_float_kernel_bf16_nan() {
        let x1 = [bf16::INFINITY, bf16::from_f32(4.0)];
        let x2 = [bf16::from_f32(2.0), bf16::from_f32(3.0)];
        let kernel = FloorModFloat::<bf16>::new(KernelKey::FloorModBF16);
        let out = run(&kernel, bytemuck::cast_slice(&x1), bytemuck::cast_slice(&x2), 2);
        let y: Vec<bf16> = bytemuck::pod_collect_to_vec(&out);
        assert!(y[0].is_nan());
        assert_eq!(y[1].to_f32(), 1.0);
    }

    #[test]
    fn test_exact_kernel_matches_scalar() {
        let x1 = [i32::MIN, -1_234_567_891, 987_654_321, -5, 0, 1 << 25];
        let x2 = [3, 1_000_003, -77, 2, -9, -(1 << 24) - 1];
        let out = run(&FloorModI32Exact, bytemuck::cast_slice(&x1), bytemuck::cast_slice(&x2), 6);
        let y: Vec<i32> = bytemuck::pod_collect_to_vec(&out);
        let expected: Vec<i32> = x1.iter().zip(&x2).map(|(&a, &b)| reference(a, b)).collect();
        assert_eq!(y, expected);
    }

    #[test]
    fn test_kernel_rejects_short_slot() {
        let x = [1i32; 4];
        let mut out = [0u32; 2];
        let mut scratch = [0u32; 8];
        let err = FloorModI32Fast
            .compute(
                &[bytemuck::cast_slice::<i32, u8>(&x), bytemuck::cast_slice::<i32, u8>(&x)],
                bytemuck::cast_slice_mut(&mut out),
                bytemuck::cast_slice_mut(&mut scratch),
                4,
            )
            .unwrap_err();
        assert_eq!(err, KernelError::SlotTooSmall { have: 8, need: 16 });
    }

    #[test]
    fn test_kernel_rejects_wrong_arity() {
        let x = [1i32; 4];
        let mut out = [0u32; 4];
        let mut scratch = [0u32; 8];
        let err = FloorModI32Exact
            .compute(
                &[bytemuck::cast_slice::<i32, u8>(&x)],
                bytemuck::cast_slice_mut(&mut out),
                bytemuck::cast_slice_mut(&mut scratch),
                4,
            )
            .unwrap_err();
        assert!(matches!(err, KernelError::Arity { expected: 2, got: 1, .. }));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_exact_i32_matches_reference(
                a in any::<i32>(),
                b in any::<i32>().prop_filter("nonzero divisor", |b| *b != 0),
            ) {
                prop_assert_eq!(floor_mod_i32_exact(a, b), reference(a, b));
            }

            #[test]
            fn prop_float_sign_and_magnitude(a in -100_000i32..100_000, b in -1000i32..1000) {
                prop_assume!(b != 0);
                let (x1, x2) = (a as f32, b as f32);
                let y = floor_mod_f32(x1, x2);
                prop_assert!(y == 0.0 || (y < 0.0) == (x2 < 0.0));
                prop_assert!(y.abs() < x2.abs());
            }

            #[test]
            fn prop_float_finite_operands_stay_bounded(
                x1 in any::<f32>().prop_filter("finite", |v| v.is_finite()),
                x2 in any::<f32>().prop_filter("finite nonzero", |v| v.is_finite() && *v != 0.0),
            ) {
                let y = floor_mod_f32(x1, x2);
                prop_assert!(y.is_finite(), "{} mod {} = {}", x1, x2, y);
                // a tiny negative dividend rounds up to exactly |x2|
                prop_assert!(y.abs() <= x2.abs(), "{} mod {} = {}", x1, x2, y);
                prop_assert!(y == 0.0 || (y < 0.0) == (x2 < 0.0), "{} mod {} = {}", x1, x2, y);
            }
        }
    }
}
