//! Polynomial rings `T[X]/(X^N + 1)`.
//!
//! `Poly<T, N>` is the coefficient-domain ring over a plain element type;
//! only the operations the rest of the crate needs exist here: pointwise
//! addition and subtraction, comparison, and multiplication by a
//! [`BitMonomial`]. `PolyMod<M, N, R>` specializes to `Mod<M>` elements and
//! carries its representation in the type: pointwise multiplication is only
//! defined in the NTT representation, monomial rotation only in the
//! coefficient representation. `N` must be a power of two.

use core::marker::PhantomData;

use itertools::izip;
use num_traits::Zero;

use crate::ints::bit_monomial::BitMonomial;
use crate::ints::modular::{Mod, Modulus};

/// Domain marker for [`PolyMod`].
pub trait Representation: Copy + Send + Sync + 'static + sealed::Sealed {}

/// Coefficient domain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Coefficient;

/// Number-theoretic-transform (evaluation) domain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ntt;

impl Representation for Coefficient {}
impl Representation for Ntt {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Coefficient {}
    impl Sealed for super::Ntt {}
}

/// Branch-free source index and sign for one output lane of a monomial
/// rotation: `j = (i - d) mod 2N`; lanes with `j >= N` read `j - N` negated.
#[inline]
pub(crate) fn monomial_lane(n: usize, i: usize, degree: usize) -> (usize, bool) {
    debug_assert!(n.is_power_of_two());
    debug_assert!(degree < 2 * n);
    let bits = n.trailing_zeros();
    let diff = i.wrapping_sub(degree);
    let index = diff & (n - 1);
    // Exactly one wrap past a multiple of N flips the sign.
    let flip = (diff >> bits) & 1 == 1;
    (index, flip)
}

/// Dense polynomial over `T` in `T[X]/(X^N + 1)`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Poly<T, const N: usize> {
    coeffs: Vec<T>,
}

impl<T, const N: usize> Poly<T, N> {
    pub fn from_coeffs(coeffs: Vec<T>) -> Self {
        assert!(N.is_power_of_two());
        assert_eq!(coeffs.len(), N);
        Self { coeffs }
    }

    pub fn from_fn(f: impl FnMut(usize) -> T) -> Self {
        Self::from_coeffs((0..N).map(f).collect())
    }

    pub fn coeffs(&self) -> &[T] {
        &self.coeffs
    }
}

impl<T: Zero + Clone, const N: usize> Poly<T, N> {
    pub fn zero() -> Self {
        Self::from_coeffs(vec![T::zero(); N])
    }
}

impl<T, const N: usize> Poly<T, N>
where
    T: Copy + Zero + core::ops::Neg<Output = T>,
{
    /// Multiply by `±X^k`: a conditionally negated cyclic rotation of the
    /// coefficients. The zero monomial yields the zero polynomial.
    pub fn monomial_mul(&self, m: BitMonomial<N>) -> Self {
        let Some(degree) = m.degree() else {
            return Self::from_coeffs(vec![T::zero(); N]);
        };
        Self::from_fn(|i| {
            let (j, flip) = monomial_lane(N, i, degree);
            if flip {
                -self.coeffs[j]
            } else {
                self.coeffs[j]
            }
        })
    }
}

impl<T, const N: usize> core::ops::Add for &Poly<T, N>
where
    T: Copy + core::ops::Add<Output = T>,
{
    type Output = Poly<T, N>;

    fn add(self, rhs: Self) -> Poly<T, N> {
        Poly::from_coeffs(izip!(&self.coeffs, &rhs.coeffs).map(|(&a, &b)| a + b).collect())
    }
}

impl<T, const N: usize> core::ops::Sub for &Poly<T, N>
where
    T: Copy + core::ops::Sub<Output = T>,
{
    type Output = Poly<T, N>;

    fn sub(self, rhs: Self) -> Poly<T, N> {
        Poly::from_coeffs(izip!(&self.coeffs, &rhs.coeffs).map(|(&a, &b)| a - b).collect())
    }
}

/// Polynomial over `Z_Q` with its domain tracked in the type.
pub struct PolyMod<M: Modulus, const N: usize, R: Representation = Coefficient> {
    coeffs: Vec<Mod<M>>,
    _rep: PhantomData<R>,
}

impl<M: Modulus, const N: usize, R: Representation> Clone for PolyMod<M, N, R> {
    fn clone(&self) -> Self {
        Self { coeffs: self.coeffs.clone(), _rep: PhantomData }
    }
}

impl<M: Modulus, const N: usize, R: Representation> PartialEq for PolyMod<M, N, R> {
    fn eq(&self, other: &Self) -> bool {
        self.coeffs == other.coeffs
    }
}

impl<M: Modulus, const N: usize, R: Representation> Eq for PolyMod<M, N, R> {}

impl<M: Modulus, const N: usize, R: Representation> core::fmt::Debug for PolyMod<M, N, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolyMod").field("n", &N).field("coeffs", &self.coeffs).finish()
    }
}

impl<M: Modulus, const N: usize, R: Representation> PolyMod<M, N, R> {
    pub fn from_coeffs(coeffs: Vec<Mod<M>>) -> Self {
        assert!(N.is_power_of_two());
        assert_eq!(coeffs.len(), N);
        Self { coeffs, _rep: PhantomData }
    }

    pub fn from_fn(f: impl FnMut(usize) -> Mod<M>) -> Self {
        Self::from_coeffs((0..N).map(f).collect())
    }

    pub fn zero() -> Self {
        Self::from_coeffs(vec![Mod::ZERO; N])
    }

    pub fn coeffs(&self) -> &[Mod<M>] {
        &self.coeffs
    }
}

impl<M: Modulus, const N: usize, R: Representation> core::ops::Add for &PolyMod<M, N, R> {
    type Output = PolyMod<M, N, R>;

    fn add(self, rhs: Self) -> Self::Output {
        PolyMod::from_coeffs(izip!(&self.coeffs, &rhs.coeffs).map(|(&a, &b)| a + b).collect())
    }
}

impl<M: Modulus, const N: usize, R: Representation> core::ops::Sub for &PolyMod<M, N, R> {
    type Output = PolyMod<M, N, R>;

    fn sub(self, rhs: Self) -> Self::Output {
        PolyMod::from_coeffs(izip!(&self.coeffs, &rhs.coeffs).map(|(&a, &b)| a - b).collect())
    }
}

impl<M: Modulus, const N: usize, R: Representation> core::ops::Neg for &PolyMod<M, N, R> {
    type Output = PolyMod<M, N, R>;

    fn neg(self) -> Self::Output {
        PolyMod::from_coeffs(self.coeffs.iter().map(|&a| -a).collect())
    }
}

/// Pointwise product; multiplication in the ring is only defined in the NTT
/// domain.
impl<M: Modulus, const N: usize> core::ops::Mul for &PolyMod<M, N, Ntt> {
    type Output = PolyMod<M, N, Ntt>;

    fn mul(self, rhs: Self) -> Self::Output {
        PolyMod::from_coeffs(izip!(&self.coeffs, &rhs.coeffs).map(|(&a, &b)| a * b).collect())
    }
}

impl<M: Modulus, const N: usize> PolyMod<M, N, Coefficient> {
    /// Multiply by `±X^k` (see [`Poly::monomial_mul`]).
    pub fn monomial_mul(&self, m: BitMonomial<N>) -> Self {
        let Some(degree) = m.degree() else {
            return Self::zero();
        };
        Self::from_fn(|i| {
            let (j, flip) = monomial_lane(N, i, degree);
            if flip {
                -self.coeffs[j]
            } else {
                self.coeffs[j]
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_modulus;

    define_modulus!(struct Q17, 1, "17");

    fn poly(vals: &[i64]) -> PolyMod<Q17, 8, Coefficient> {
        PolyMod::from_coeffs(vals.iter().map(|&v| Mod::from_i64(v)).collect())
    }

    #[test]
    fn negacyclic_monomial_shift() {
        let x = poly(&[1, 2, 3, 4, 5, 6, 7, 8]);
        // x · X: the top coefficient wraps around negated.
        let y = x.monomial_mul(BitMonomial::new(1));
        assert_eq!(y, poly(&[-8, 1, 2, 3, 4, 5, 6, 7]));
        // x · X^9 = x · X^(N+1) = -(x · X).
        let z = x.monomial_mul(BitMonomial::new(9));
        assert_eq!(z, poly(&[8, -1, -2, -3, -4, -5, -6, -7]));
        assert_eq!(&PolyMod::zero() - &z, y);
    }

    #[test]
    fn monomial_degree_n_negates() {
        let x = poly(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let y = x.monomial_mul(BitMonomial::new(8));
        assert_eq!(y, (&PolyMod::zero() - &x));
    }

    #[test]
    fn zero_monomial_yields_zero() {
        let x = poly(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(x.monomial_mul(BitMonomial::ZERO), PolyMod::zero());
    }

    #[test]
    fn monomial_composition_matches() {
        let x = poly(&[3, 1, 4, 1, 5, 9, 2, 6]);
        let a = BitMonomial::<8>::new(5);
        let b = BitMonomial::<8>::new(6);
        let via_product = x.monomial_mul(a * b);
        let via_steps = x.monomial_mul(a).monomial_mul(b);
        assert_eq!(via_product, via_steps);
    }

    #[test]
    fn pointwise_ring_ops() {
        let x = poly(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let y = poly(&[8, 7, 6, 5, 4, 3, 2, 1]);
        let s = &x + &y;
        assert_eq!(s, poly(&[9; 8]));
        assert_eq!(&s - &y, x);
        assert_eq!(&x - &x, PolyMod::zero());
    }

    #[test]
    fn signed_poly_monomial() {
        let x: Poly<i64, 4> = Poly::from_coeffs(vec![1, 2, 3, 4]);
        let y = x.monomial_mul(BitMonomial::new(1));
        assert_eq!(y.coeffs(), &[-4, 1, 2, 3]);
    }
}
