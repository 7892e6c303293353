//! Vectorized CPU backend.
//!
//! Kernels keep one accumulator per vector lane so the compiler can map them
//! onto the detected instruction set. On x86_64 the kernels are instantiated
//! inside `#[target_feature]` functions; on aarch64 NEON is part of the
//! baseline target.

use std::sync::Arc;

use crate::backend::ComputeBackend;
use crate::dtype::DType;
use crate::error::Result;
use crate::pool::TensorPool;
use crate::storage::{BlockQ8_0, QK8_0};
use crate::tensor::{Tensor, TensorView};

use super::quant;

/// Wide-vector instruction sets the vector backend can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorIsa {
    Avx512,
    Avx2,
    Neon,
}

impl VectorIsa {
    /// The widest instruction set available on this CPU, if any.
    pub fn detect() -> Option<VectorIsa> {
        [VectorIsa::Avx512, VectorIsa::Avx2, VectorIsa::Neon]
            .into_iter()
            .find(|isa| isa.is_available())
    }

    pub fn is_available(self) -> bool {
        match self {
            #[cfg(target_arch = "x86_64")]
            VectorIsa::Avx512 => is_x86_feature_detected!("avx512f"),
            #[cfg(target_arch = "x86_64")]
            VectorIsa::Avx2 => is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma"),
            #[cfg(target_arch = "aarch64")]
            VectorIsa::Neon => true,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    /// f32 lanes per vector register.
    pub fn lanes(self) -> usize {
        match self {
            VectorIsa::Avx512 => 16,
            VectorIsa::Avx2 => 8,
            VectorIsa::Neon => 4,
        }
    }

    fn label(self) -> &'static str {
        match self {
            VectorIsa::Avx512 => "vector-avx512",
            VectorIsa::Avx2 => "vector-avx2",
            VectorIsa::Neon => "vector-neon",
        }
    }
}

/// Lane-parallel backend for CPUs with a wide vector unit.
#[derive(Debug, Clone)]
pub struct VectorBackend {
    isa: VectorIsa,
}

impl VectorBackend {
    /// A backend for the widest instruction set this CPU supports.
    pub fn detect() -> Option<Self> {
        VectorIsa::detect().map(|isa| VectorBackend { isa })
    }

    /// A backend for `isa`, or `None` if this CPU cannot run it.
    pub fn with_isa(isa: VectorIsa) -> Option<Self> {
        isa.is_available().then_some(VectorBackend { isa })
    }

    pub fn isa(&self) -> VectorIsa {
        self.isa
    }
}

impl ComputeBackend for VectorBackend {
    fn name(&self) -> &str {
        self.isa.label()
    }

    fn dot_f32(&self, a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let (a, b) = (&a[..n], &b[..n]);
        match self.isa {
            // SAFETY: a VectorBackend only exists for an ISA that passed
            // runtime detection.
            #[cfg(target_arch = "x86_64")]
            VectorIsa::Avx512 => unsafe { x86::dot_f32_avx512(a, b) },
            #[cfg(target_arch = "x86_64")]
            VectorIsa::Avx2 => unsafe { x86::dot_f32_avx2(a, b) },
            _ => dot_f32_lanes::<4>(a, b),
        }
    }

    fn dot_q8_0(&self, a: &[f32], b: &[BlockQ8_0]) -> f32 {
        match self.isa {
            // SAFETY: see dot_f32.
            #[cfg(target_arch = "x86_64")]
            VectorIsa::Avx512 => unsafe { x86::dot_q8_0_avx512(a, b) },
            #[cfg(target_arch = "x86_64")]
            VectorIsa::Avx2 => unsafe { x86::dot_q8_0_avx2(a, b) },
            _ => dot_q8_0_lanes::<4>(a, b),
        }
    }

    fn quantize(
        &self,
        input: &TensorView<'_>,
        target: DType,
        pool: &Arc<TensorPool>,
    ) -> Result<Tensor> {
        quant::quantize_tensor(input, target, pool)
    }
}

#[inline(always)]
fn dot_f32_lanes<const L: usize>(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; L];
    let mut ca = a.chunks_exact(L);
    let mut cb = b.chunks_exact(L);
    for (xa, xb) in (&mut ca).zip(&mut cb) {
        for l in 0..L {
            acc[l] += xa[l] * xb[l];
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        sum += x * y;
    }
    sum
}

#[inline(always)]
fn dot_q8_0_lanes<const L: usize>(a: &[f32], b: &[BlockQ8_0]) -> f32 {
    let mut sum = 0.0f32;
    for (chunk, block) in a.chunks(QK8_0).zip(b) {
        let mut block_sum = 0.0f32;
        if chunk.len() == QK8_0 {
            let mut acc = [0.0f32; L];
            for (xa, qa) in chunk.chunks_exact(L).zip(block.quants.chunks_exact(L)) {
                for l in 0..L {
                    acc[l] += xa[l] * qa[l] as f32;
                }
            }
            block_sum = acc.iter().sum();
        } else {
            for (x, &q) in chunk.iter().zip(block.quants.iter()) {
                block_sum += x * q as f32;
            }
        }
        sum += block_sum * block.scale;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::{dot_f32_lanes, dot_q8_0_lanes};
    use crate::storage::BlockQ8_0;

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn dot_f32_avx2(a: &[f32], b: &[f32]) -> f32 {
        dot_f32_lanes::<8>(a, b)
    }

    #[target_feature(enable = "avx512f")]
    pub(super) unsafe fn dot_f32_avx512(a: &[f32], b: &[f32]) -> f32 {
        dot_f32_lanes::<16>(a, b)
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn dot_q8_0_avx2(a: &[f32], b: &[BlockQ8_0]) -> f32 {
        dot_q8_0_lanes::<8>(a, b)
    }

    #[target_feature(enable = "avx512f")]
    pub(super) unsafe fn dot_q8_0_avx512(a: &[f32], b: &[BlockQ8_0]) -> f32 {
        dot_q8_0_lanes::<16>(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::shape::Shape;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vec(rng: &mut StdRng, n: usize) -> Vec<f32> {
        (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    /// Relative agreement, measured against the magnitude of the summed terms
    /// so that cancellation near zero does not inflate the error.
    fn assert_agrees(reference: f32, candidate: f32, a: &[f32], b: &[f32]) {
        let magnitude: f32 = a.iter().zip(b).map(|(x, y)| (x * y).abs()).sum();
        let tol = 1e-4 * magnitude.max(1.0);
        assert!(
            (reference - candidate).abs() <= tol,
            "reference {} vs {} (tol {})",
            reference,
            candidate,
            tol
        );
    }

    #[test]
    fn test_lane_kernels_match_scalar() {
        let scalar = CpuBackend::new();
        let mut rng = StdRng::seed_from_u64(7);
        for n in [1usize, 7, 8, 31, 256] {
            let a = random_vec(&mut rng, n);
            let b = random_vec(&mut rng, n);
            let reference = scalar.dot_f32(&a, &b);
            assert_agrees(reference, dot_f32_lanes::<4>(&a, &b), &a, &b);
            assert_agrees(reference, dot_f32_lanes::<8>(&a, &b), &a, &b);
            assert_agrees(reference, dot_f32_lanes::<16>(&a, &b), &a, &b);
        }
    }

    #[test]
    fn test_detected_backend_matches_scalar() {
        let Some(vector) = VectorBackend::detect() else {
            return;
        };
        let scalar = CpuBackend::new();
        let mut rng = StdRng::seed_from_u64(11);
        for n in [1usize, 7, 8, 31, 256] {
            let a = random_vec(&mut rng, n);
            let b = random_vec(&mut rng, n);
            assert_agrees(scalar.dot_f32(&a, &b), vector.dot_f32(&a, &b), &a, &b);
        }
    }

    #[test]
    fn test_q8_0_kernels_match_scalar() {
        let scalar = CpuBackend::new();
        let pool = Arc::new(TensorPool::default());
        let mut rng = StdRng::seed_from_u64(3);
        for n in [1usize, 7, 8, 31, 256] {
            let a = random_vec(&mut rng, n);
            let b = random_vec(&mut rng, n);
            let view = TensorView::from_f32(&b, Shape::new(vec![n]).unwrap()).unwrap();
            let q = scalar.quantize(&view, DType::Q8_0, &pool).unwrap();
            let blocks = q.view().as_q8_0().unwrap();

            let reference = scalar.dot_q8_0(&a, blocks);
            assert_agrees(reference, dot_q8_0_lanes::<4>(&a, blocks), &a, &b);
            assert_agrees(reference, dot_q8_0_lanes::<16>(&a, blocks), &a, &b);
            if let Some(vector) = VectorBackend::detect() {
                assert_agrees(reference, vector.dot_q8_0(&a, blocks), &a, &b);
            }
        }
    }

    #[test]
    fn test_with_isa_rejects_unavailable() {
        for isa in [VectorIsa::Avx512, VectorIsa::Avx2, VectorIsa::Neon] {
            assert_eq!(VectorBackend::with_isa(isa).is_some(), isa.is_available());
        }
    }
}
