//! Linearly homomorphic encryption shells over the expression layer.
//!
//! A ciphertext is the pair `(c0, c1) = (b·u + p·v + m, a·u + p·w)` under a
//! public key `(a, b = -a·s + p·e)`, all in the NTT domain; decryption is
//! `c0 + c1·s`, brought back to coefficients and read centered modulo the
//! plaintext modulus. The shells below are typed records of expressions:
//! they add nothing at run time beyond the underlying polynomial operations,
//! and they make the planner package results as ciphertexts and randomness
//! triples instead of anonymous tuples.

use crate::core::limb::{Limb, MAX_LIMBS};
use crate::exec::Executor;
use crate::ints::modular::{Mod, Modulus, NttModulus, Repr};
use crate::shape::Shape;
use crate::tensor::Tensor;

use super::planner::{Evaluate, Queue};
use super::Expr;

/// Materialized ciphertext: two NTT-domain polynomial tensors.
pub struct Ciphertext<M: Modulus> {
    pub c0: Tensor<Mod<M>>,
    pub c1: Tensor<Mod<M>>,
}

impl<M: Modulus> Ciphertext<M> {
    /// Re-enter the expression layer.
    pub fn expr<const N: usize>(&self) -> CiphertextExpr<M> {
        CiphertextExpr { c0: Expr::poly_ntt::<N>(&self.c0), c1: Expr::poly_ntt::<N>(&self.c1) }
    }
}

/// Deferred ciphertext; addition and plaintext multiplication distribute
/// componentwise, preserving linearity through the expression layer.
pub struct CiphertextExpr<M: Modulus> {
    pub c0: Expr<M>,
    pub c1: Expr<M>,
}

impl<M: Modulus> Clone for CiphertextExpr<M> {
    fn clone(&self) -> Self {
        Self { c0: self.c0.clone(), c1: self.c1.clone() }
    }
}

impl<M: Modulus> core::ops::Add for &CiphertextExpr<M> {
    type Output = CiphertextExpr<M>;

    fn add(self, rhs: Self) -> CiphertextExpr<M> {
        CiphertextExpr { c0: &self.c0 + &rhs.c0, c1: &self.c1 + &rhs.c1 }
    }
}

impl<M: Modulus> core::ops::Sub for &CiphertextExpr<M> {
    type Output = CiphertextExpr<M>;

    fn sub(self, rhs: Self) -> CiphertextExpr<M> {
        CiphertextExpr { c0: &self.c0 - &rhs.c0, c1: &self.c1 - &rhs.c1 }
    }
}

impl<M: Modulus> core::ops::Mul<&Expr<M>> for &CiphertextExpr<M> {
    type Output = CiphertextExpr<M>;

    fn mul(self, rhs: &Expr<M>) -> CiphertextExpr<M> {
        CiphertextExpr { c0: &self.c0 * rhs, c1: &self.c1 * rhs }
    }
}

impl<M: Modulus> core::ops::Neg for &CiphertextExpr<M> {
    type Output = CiphertextExpr<M>;

    fn neg(self) -> CiphertextExpr<M> {
        CiphertextExpr { c0: -&self.c0, c1: -&self.c1 }
    }
}

impl<M: Modulus> Evaluate<M> for CiphertextExpr<M> {
    type Output = Ciphertext<M>;

    fn collect(&self, roots: &mut Vec<Expr<M>>) {
        roots.push(self.c0.clone());
        roots.push(self.c1.clone());
    }

    fn assemble(&self, results: &mut std::vec::IntoIter<Tensor<Mod<M>>>) -> Self::Output {
        let c0 = results.next().expect("missing c0");
        let c1 = results.next().expect("missing c1");
        Ciphertext { c0, c1 }
    }
}

/// Materialized encryption randomness `(u, v, w)`.
pub struct EncRandomness<M: Modulus> {
    pub u: Tensor<Mod<M>>,
    pub v: Tensor<Mod<M>>,
    pub w: Tensor<Mod<M>>,
}

/// Deferred encryption randomness triple.
pub struct RandomnessExpr<M: Modulus> {
    pub u: Expr<M>,
    pub v: Expr<M>,
    pub w: Expr<M>,
}

impl<M: Modulus> Clone for RandomnessExpr<M> {
    fn clone(&self) -> Self {
        Self { u: self.u.clone(), v: self.v.clone(), w: self.w.clone() }
    }
}

impl<M: Modulus> Evaluate<M> for RandomnessExpr<M> {
    type Output = EncRandomness<M>;

    fn collect(&self, roots: &mut Vec<Expr<M>>) {
        roots.push(self.u.clone());
        roots.push(self.v.clone());
        roots.push(self.w.clone());
    }

    fn assemble(&self, results: &mut std::vec::IntoIter<Tensor<Mod<M>>>) -> Self::Output {
        let u = results.next().expect("missing u");
        let v = results.next().expect("missing v");
        let w = results.next().expect("missing w");
        EncRandomness { u, v, w }
    }
}

/// Fresh encryption randomness: three NTT-transformed centered-binomial
/// polynomials of the given variances.
pub fn randomness<M: NttModulus, const N: usize>(
    shape: Shape,
    variance_u: u32,
    variance_v: u32,
    variance_w: u32,
) -> RandomnessExpr<M> {
    RandomnessExpr {
        u: Expr::centered_binomial::<N>(shape.clone(), variance_u).ntt(),
        v: Expr::centered_binomial::<N>(shape.clone(), variance_v).ntt(),
        w: Expr::centered_binomial::<N>(shape, variance_w).ntt(),
    }
}

/// Randomness whose `v` component statistically drowns any addend bounded
/// by `2^bound_bits`; used before opening linear combinations of
/// ciphertexts.
pub fn drowning_randomness<M: NttModulus, const N: usize>(
    shape: Shape,
    bound_bits: u32,
    variance_u: u32,
    variance_w: u32,
) -> RandomnessExpr<M> {
    RandomnessExpr {
        u: Expr::centered_binomial::<N>(shape.clone(), variance_u).ntt(),
        v: Expr::drown_signed_uniform::<N>(shape.clone(), bound_bits).ntt(),
        w: Expr::centered_binomial::<N>(shape, variance_w).ntt(),
    }
}

/// Secret and public key material, NTT domain.
pub struct SecretKey<M: Modulus> {
    pub s: Tensor<Mod<M>>,
}

pub struct PublicKey<M: Modulus> {
    pub a: Tensor<Mod<M>>,
    pub b: Tensor<Mod<M>>,
}

/// Generate `(s, (a, b = -a·s + p·e))` with secret and error coefficients
/// from centered binomials of the given variances.
pub fn keygen<M: NttModulus, const N: usize, E: Executor>(
    queue: &Queue<E>,
    plaintext_modulus: Mod<M>,
    variance_s: u32,
    variance_e: u32,
) -> (SecretKey<M>, PublicKey<M>) {
    let s = Expr::centered_binomial::<N>(Shape::scalar(), variance_s).ntt();
    let a = Expr::uniform_poly::<N>(Shape::scalar()).ntt();
    let e = Expr::centered_binomial::<N>(Shape::scalar(), variance_e).ntt();
    let p = Expr::constant(plaintext_modulus);
    let b = -&(&a * &s) + &e * &p;
    let (s, a, b) = queue.run((s, a, b));
    (SecretKey { s }, PublicKey { a, b })
}

/// `Enc(m; u, v, w) = (b·u + p·v + m, a·u + p·w)`. All operands are
/// NTT-domain expressions; `a` and `b` must already be shaped (or
/// unsqueezed) against the message's shape.
pub fn encrypt<M: Modulus>(
    a: &Expr<M>,
    b: &Expr<M>,
    plaintext_modulus: Mod<M>,
    message: &Expr<M>,
    randomness: &RandomnessExpr<M>,
) -> CiphertextExpr<M> {
    let p = Expr::constant(plaintext_modulus);
    CiphertextExpr {
        c0: &(b * &randomness.u) + &(&randomness.v * &p) + message,
        c1: &(a * &randomness.u) + &(&randomness.w * &p),
    }
}

/// `Dec(s, (c0, c1)) = c0 + c1·s`, still in the NTT domain; apply `intt`
/// and [`decode`] to read the plaintext.
pub fn decrypt<M: Modulus>(s: &Expr<M>, ct: &CiphertextExpr<M>) -> Expr<M> {
    &ct.c0 + &(&ct.c1 * s)
}

/// Read a coefficient-domain tensor as plaintext residues: each coefficient
/// is taken centered in `(-Q/2, Q/2]` and reduced modulo the plaintext
/// modulus into `[0, p)`.
pub fn decode<M: Modulus>(coeffs: &Tensor<Mod<M>>, plaintext_modulus: u64) -> Vec<u64> {
    let p = plaintext_modulus;
    assert!(p > 1);
    coeffs
        .to_vec()
        .iter()
        .map(|c| {
            let (mut limbs, negative) = c.to_centered_limbs();
            if negative {
                // The centered representative wrapped two's complement;
                // recover the magnitude as `!x + 1`.
                let slice = limbs.as_limbs_mut();
                let mut carry = true;
                for limb in slice.iter_mut() {
                    let (v, c2) = (!*limb).overflowing_add(carry as Limb);
                    *limb = v;
                    carry = c2;
                }
            }
            let mut q = [0 as Limb; 2 * MAX_LIMBS];
            let mut r = [0 as Limb; 1];
            crate::core::num::div_rem(&mut q, &mut r, limbs.as_limbs(), &[p]);
            if negative && r[0] != 0 {
                p - r[0]
            } else {
                r[0]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CpuExecutor;

    crate::define_ntt_modulus!(
        struct Goldilocks, 1, "0xFFFFFFFF00000001",
        two_adicity = 32, root = "0x185629dcda58878c"
    );
    crate::define_ntt_modulus!(
        struct Q120, 2, "0x800000000000000000000002300001",
        two_adicity = 20, root = "0x25af87a2a0f3075a8d40d0138cd2fb"
    );

    const N: usize = 64;
    const P: u64 = 65537;

    fn queue() -> Queue {
        Queue::with_key(CpuExecutor::new(), [0xC0FE; 8])
    }

    fn message(queue_len: usize) -> Vec<u64> {
        (0..queue_len).map(|i| (i as u64 * 31 + 5) % P).collect()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let queue = queue();
        let (sk, pk) = keygen::<Goldilocks, N, _>(&queue, Mod::from_u64(P), 10, 10);

        let m_vals = message(N);
        let m = Tensor::from_fn(Shape::new(&[N]), |i| Mod::<Goldilocks>::from_u64(m_vals[i]));
        let m_ntt = Expr::poly_coeff::<N>(&m).ntt();

        let r = randomness::<Goldilocks, N>(Shape::scalar(), 1, 10, 10);
        let a = Expr::poly_ntt::<N>(&pk.a);
        let b = Expr::poly_ntt::<N>(&pk.b);
        let ct = queue.run(&encrypt(&a, &b, Mod::from_u64(P), &m_ntt, &r));

        let s = Expr::poly_ntt::<N>(&sk.s);
        let coeffs = queue.run(&decrypt(&s, &ct.expr::<N>()).intt());
        assert_eq!(decode(&coeffs, P), m_vals);
    }

    #[test]
    fn trivial_key_decrypts_exactly_multi_limb() {
        // s = 1 (NTT of the constant-one polynomial is all ones), e = 0, so
        // b = -a and decryption is exact for every message.
        const N16: usize = 16;
        let p: u64 = 9809640459238244353;
        let queue = queue();

        let s = Tensor::from_fn(Shape::new(&[N16]), |_| Mod::<Q120>::ONE);
        let a_t = queue.run(&Expr::<Q120>::uniform_poly::<N16>(Shape::scalar()).ntt());
        let a = Expr::poly_ntt::<N16>(&a_t);
        let b = -&a;

        let m_vals: Vec<u64> = (0..N16 as u64).map(|i| i.wrapping_mul(0x9E3779B97F4A7C15) % p).collect();
        let m = Tensor::from_fn(Shape::new(&[N16]), |i| Mod::<Q120>::from_u64(m_vals[i]));
        let m_ntt = Expr::poly_coeff::<N16>(&m).ntt();

        let r = randomness::<Q120, N16>(Shape::scalar(), 10, 10, 10);
        let ct = queue.run(&encrypt(&a, &b, Mod::from_u64(p), &m_ntt, &r));

        let coeffs = queue.run(&decrypt(&Expr::poly_ntt::<N16>(&s), &ct.expr::<N16>()).intt());
        assert_eq!(decode(&coeffs, p), m_vals);
    }

    #[test]
    fn ciphertexts_add_homomorphically() {
        let queue = queue();
        let (sk, pk) = keygen::<Goldilocks, N, _>(&queue, Mod::from_u64(P), 10, 10);
        let a = Expr::poly_ntt::<N>(&pk.a);
        let b = Expr::poly_ntt::<N>(&pk.b);

        let m1_vals = message(N);
        let m2_vals: Vec<u64> = (0..N).map(|i| (i as u64 * 7 + 11) % P).collect();
        let enc = |vals: &[u64]| {
            let m = Tensor::from_fn(Shape::new(&[N]), |i| Mod::<Goldilocks>::from_u64(vals[i]));
            let r = randomness::<Goldilocks, N>(Shape::scalar(), 1, 10, 10);
            queue.run(&encrypt(&a, &b, Mod::from_u64(P), &Expr::poly_coeff::<N>(&m).ntt(), &r))
        };
        let ct1 = enc(&m1_vals);
        let ct2 = enc(&m2_vals);

        let sum = &ct1.expr::<N>() + &ct2.expr::<N>();
        let s = Expr::poly_ntt::<N>(&sk.s);
        let coeffs = queue.run(&decrypt(&s, &sum).intt());
        let expected: Vec<u64> =
            m1_vals.iter().zip(&m2_vals).map(|(x, y)| (x + y) % P).collect();
        assert_eq!(decode(&coeffs, P), expected);
    }

    #[test]
    fn plaintext_multiplication_scales_the_message() {
        let queue = queue();
        let (sk, pk) = keygen::<Goldilocks, N, _>(&queue, Mod::from_u64(P), 10, 10);
        let a = Expr::poly_ntt::<N>(&pk.a);
        let b = Expr::poly_ntt::<N>(&pk.b);

        let m_vals = message(N);
        let m = Tensor::from_fn(Shape::new(&[N]), |i| Mod::<Goldilocks>::from_u64(m_vals[i]));
        let r = randomness::<Goldilocks, N>(Shape::scalar(), 1, 10, 10);
        let ct =
            queue.run(&encrypt(&a, &b, Mod::from_u64(P), &Expr::poly_coeff::<N>(&m).ntt(), &r));

        let two = Expr::constant(Mod::from_u64(2));
        let scaled = &ct.expr::<N>() * &two;
        let s = Expr::poly_ntt::<N>(&sk.s);
        let coeffs = queue.run(&decrypt(&s, &scaled).intt());
        let expected: Vec<u64> = m_vals.iter().map(|x| (2 * x) % P).collect();
        assert_eq!(decode(&coeffs, P), expected);
    }

    #[test]
    fn drowning_randomness_still_decrypts() {
        const N16: usize = 16;
        let p: u64 = 2;
        let queue = queue();

        let s = Tensor::from_fn(Shape::new(&[N16]), |_| Mod::<Q120>::ONE);
        let a_t = queue.run(&Expr::<Q120>::uniform_poly::<N16>(Shape::scalar()).ntt());
        let a = Expr::poly_ntt::<N16>(&a_t);
        let b = -&a;

        let m_vals: Vec<u64> = (0..N16 as u64).map(|i| i % p).collect();
        let m = Tensor::from_fn(Shape::new(&[N16]), |i| Mod::<Q120>::from_u64(m_vals[i]));
        let r = drowning_randomness::<Q120, N16>(Shape::scalar(), 3, 10, 10);
        let ct = queue.run(&encrypt(&a, &b, Mod::from_u64(p), &Expr::poly_coeff::<N16>(&m).ntt(), &r));

        let coeffs = queue.run(&decrypt(&Expr::poly_ntt::<N16>(&s), &ct.expr::<N16>()).intt());
        assert_eq!(decode(&coeffs, p), m_vals);
    }

    #[test]
    fn randomness_triple_materializes_componentwise() {
        let queue = queue();
        let r = randomness::<Goldilocks, N>(Shape::new(&[2]), 1, 10, 10);
        let out = queue.run(&r);
        assert_eq!(out.u.len(), 2 * N);
        assert_eq!(out.v.len(), 2 * N);
        assert_eq!(out.w.len(), 2 * N);
        // Independent sources: the components differ.
        assert_ne!(out.v.to_vec(), out.w.to_vec());
    }

    #[test]
    fn production_scale_modulus_round_trip() {
        // The 279-bit ciphertext modulus with a 64-bit plaintext modulus;
        // its two-adicity (18) admits ring dimensions up to 2^17.
        crate::define_ntt_modulus!(
            struct Q279, 5,
            "676310504550516370745208338938566342426856908484397554505023779011987369401721290753",
            two_adicity = 18,
            root = "0x1188724fa66c3e8bb5d71f32f9f14d8c293c20691d577ec84d4b74a88268cbe13a9a10"
        );
        const N1K: usize = 1024;
        let p: u64 = 9809640459238244353;
        let queue = queue();

        let (sk, pk) = keygen::<Q279, N1K, _>(&queue, Mod::from_u64(p), 10, 10);
        let m_vals: Vec<u64> =
            (0..N1K as u64).map(|i| i.wrapping_mul(0xD1B54A32D192ED03) % p).collect();
        let m = Tensor::from_fn(Shape::new(&[N1K]), |i| Mod::<Q279>::from_u64(m_vals[i]));
        let r = randomness::<Q279, N1K>(Shape::scalar(), 1, 10, 10);
        let a = Expr::poly_ntt::<N1K>(&pk.a);
        let b = Expr::poly_ntt::<N1K>(&pk.b);
        let ct =
            queue.run(&encrypt(&a, &b, Mod::from_u64(p), &Expr::poly_coeff::<N1K>(&m).ntt(), &r));
        let coeffs = queue.run(&decrypt(&Expr::poly_ntt::<N1K>(&sk.s), &ct.expr::<N1K>()).intt());
        assert_eq!(decode(&coeffs, p), m_vals);
    }

    #[test]
    fn decode_is_centered() {
        // -1 mod Q decodes to p - 1: the centered lift is -1, not Q - 1.
        let t = Tensor::from_elems(Shape::new(&[2]), &[
            Mod::<Goldilocks>::from_i64(-1),
            Mod::<Goldilocks>::from_u64(3),
        ]);
        assert_eq!(decode(&t, 5), vec![4, 3]);
    }
}
