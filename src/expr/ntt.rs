//! Negacyclic NTT kernels.
//!
//! Three-phase merged transforms after Özerk et al. ("Efficient number
//! theoretic transform implementation on GPU for homomorphic encryption"):
//! a first pass that reads the (possibly fused) source and transposes into a
//! `(N, batch)` scratch tensor, `log2(N) - 2` in-place butterfly passes, and
//! a final pass that transposes back into the result tensor. The forward
//! direction is Cooley–Tukey with the twiddle applied before the butterfly;
//! the inverse is Gentleman–Sande with the twiddle after, and folds the
//! `N⁻¹` normalization into its last pass through the roots table.
//!
//! Roots tables are bit-reversed: position `bit_reverse(k)` holds `φ^k` for
//! a `2N`-th root of unity `φ` (`φ⁻¹` for the inverse). For the inverse,
//! position 0 additionally holds `N⁻¹` and position 1 is pre-multiplied by
//! `N⁻¹`.

use crate::exec::Executor;
use crate::ints::modular::{Mod, Modulus, NttModulus, Repr};
use crate::shape::Shape;
use crate::tensor::Tensor;

use super::planner::RegionEnv;
use super::Expr;

pub(crate) fn bit_reverse(i: usize, bits: u32) -> usize {
    i.reverse_bits() >> (usize::BITS - bits)
}

/// Roots-table cache key fields, per the process-wide memoization contract:
/// element type, limb geometry, ring dimension, direction tag.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RootsKey {
    pub type_id: std::any::TypeId,
    pub limb_bits: u32,
    pub limb_count: usize,
    pub n: usize,
    pub tag: &'static str,
}

pub(crate) fn roots_key<M: Modulus>(n: usize, inverse: bool) -> RootsKey {
    RootsKey {
        type_id: std::any::TypeId::of::<Mod<M>>(),
        limb_bits: crate::core::LIMB_BITS,
        limb_count: <M::Repr as Repr>::LIMBS,
        n,
        tag: if inverse { "intt" } else { "ntt" },
    }
}

/// Primitive `2N`-th root of unity derived from the modulus' two-adic root.
pub fn primitive_root<M: NttModulus>(n: usize) -> Mod<M> {
    assert!(n.is_power_of_two() && n >= 2);
    let log_order = n.trailing_zeros() + 1; // order 2N
    assert!(
        log_order <= M::TWO_ADICITY,
        "ring dimension exceeds the two-adicity of the modulus"
    );
    Mod::from_limbs(M::ROOT.as_limbs()).pow(1u64 << (M::TWO_ADICITY - log_order))
}

/// Build the bit-reversed, pre-twisted roots table for one direction.
pub fn build_roots<M: NttModulus>(n: usize, inverse: bool) -> Tensor<Mod<M>> {
    assert!(n.is_power_of_two() && n >= 4);
    let bits = n.trailing_zeros();
    let phi = primitive_root::<M>(n);
    let root = if inverse { phi.invert() } else { phi };
    let normalization = Mod::<M>::from_u64(n as u64).invert();

    let tensor = Tensor::zeroed(Shape::new(&[n]));
    {
        let w = tensor.write();
        w.set(0, if inverse { normalization } else { Mod::ONE });
        w.set(bit_reverse(1, bits), root);
        let mut power = root;
        for i in 2..n {
            power *= root;
            let j = bit_reverse(i, bits);
            // The power used by the last inverse butterfly carries the
            // normalization factor.
            if inverse && j == 1 {
                w.set(j, power * normalization);
            } else {
                w.set(j, power);
            }
        }
    }
    tensor
}

/// Dispatch a forward or inverse transform: evaluate `inner` through the
/// fused region `env`, transform along the lane axis, write `out`.
pub(crate) fn dispatch<M: Modulus>(
    executor: &dyn Executor,
    env: &RegionEnv<'_, M>,
    inner: &Expr<M>,
    out: &Tensor<Mod<M>>,
    roots: &Tensor<Mod<M>>,
    inverse: bool,
) {
    let n = inner.lanes();
    let batch = inner.shape().size();
    assert!(n >= 4, "three-phase transforms need at least two stages");
    let bits = n.trailing_zeros();
    let eshape = inner.node.element_shape();

    let scratch = Tensor::<Mod<M>>::zeroed(Shape::new(&[n, batch]));
    let psis = roots.read();

    // First pass: read source lanes, write transposed scratch.
    {
        let write = scratch.write();
        executor.submit(batch * n / 2, &|id| {
            let i = id / (n / 2);
            let tid = id % (n / 2);
            let mut rng = env.rng_for_item(id);
            if inverse {
                let target = 2 * tid;
                let psi = psis.get(n / 2 + tid);
                let u = env.eval(&mut rng, inner, &eshape.from_linear(i * n + target));
                let v = env.eval(&mut rng, inner, &eshape.from_linear(i * n + target + 1));
                write.set(target * batch + i, u + v);
                write.set((target + 1) * batch + i, (u - v) * psi);
            } else {
                let u = env.eval(&mut rng, inner, &eshape.from_linear(i * n + tid));
                let mut v = env.eval(&mut rng, inner, &eshape.from_linear(i * n + tid + n / 2));
                v *= psis.get(1);
                write.set(tid * batch + i, u + v);
                write.set((tid + n / 2) * batch + i, u - v);
            }
        });
    }

    // Middle passes over the scratch buffer.
    for iteration in 1..(bits - 1) {
        let rw = scratch.write();
        executor.submit(n / 2 * batch, &|id| {
            let tid = id / batch;
            let i = id % batch;
            let length = if inverse { n >> (iteration + 1) } else { 1 << iteration };
            let step = (n / length) / 2;
            let psi_step = tid / step;
            let target = psi_step * step * 2 + tid % step;
            let psi = psis.get(length + psi_step);
            let index = target * batch + i;
            let index_step = (target + step) * batch + i;
            let u = rw.get(index);
            let v = rw.get(index_step);
            if inverse {
                rw.set(index, u + v);
                rw.set(index_step, (u - v) * psi);
            } else {
                let v = v * psi;
                rw.set(index, u + v);
                rw.set(index_step, u - v);
            }
        });
    }

    // Final pass: transpose back into the result tensor.
    {
        let read = scratch.read();
        let write = out.write();
        executor.submit(n / 2 * batch, &|id| {
            let tid = id / batch;
            let i = id % batch;
            if inverse {
                let psi = psis.get(1);
                let u = read.get(tid * batch + i);
                let v = read.get((tid + n / 2) * batch + i);
                // psis[0] is N⁻¹; psi already carries it.
                write.set(i * n + tid, (u + v) * psis.get(0));
                write.set(i * n + tid + n / 2, (u - v) * psi);
            } else {
                let target = 2 * tid;
                let psi = psis.get(n / 2 + tid);
                let u = read.get(target * batch + i);
                let v = read.get((target + 1) * batch + i) * psi;
                write.set(i * n + target, u + v);
                write.set(i * n + target + 1, u - v);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::define_ntt_modulus!(
        struct Q17, 1, "17",
        two_adicity = 4, root = "3"
    );

    #[test]
    fn bit_reversal() {
        assert_eq!(bit_reverse(0, 3), 0);
        assert_eq!(bit_reverse(1, 3), 4);
        assert_eq!(bit_reverse(3, 3), 6);
        assert_eq!(bit_reverse(6, 3), 3);
    }

    #[test]
    fn primitive_root_has_order_2n() {
        let phi = primitive_root::<Q17>(8);
        // phi^8 = -1, phi^16 = 1
        assert_eq!(phi.pow(8), -Mod::ONE);
        assert_eq!(phi.pow(16), Mod::ONE);
        assert_ne!(phi.pow(4), -Mod::ONE);
    }

    #[test]
    fn forward_table_layout() {
        let roots = build_roots::<Q17>(8, false);
        let phi = primitive_root::<Q17>(8);
        let r = roots.read();
        assert_eq!(r.get(0), Mod::ONE);
        for k in 1..8 {
            assert_eq!(r.get(bit_reverse(k, 3)), phi.pow(k as u64));
        }
    }

    #[test]
    fn inverse_table_normalization() {
        let roots = build_roots::<Q17>(8, true);
        let psi = primitive_root::<Q17>(8).invert();
        let n_inv = Mod::<Q17>::from_u64(8).invert();
        let r = roots.read();
        assert_eq!(r.get(0), n_inv);
        // Position 1 holds psi^k (k = bit_reverse(1)) pre-scaled by N⁻¹.
        assert_eq!(r.get(1), psi.pow(4) * n_inv);
        assert_eq!(r.get(bit_reverse(3, 3)), psi.pow(3));
    }

    #[test]
    fn roots_keys_distinguish_directions() {
        assert_ne!(roots_key::<Q17>(8, false), roots_key::<Q17>(8, true));
        assert_ne!(roots_key::<Q17>(8, false), roots_key::<Q17>(16, false));
    }
}
