//! Modular integers in Montgomery form.
//!
//! A modulus is a zero-sized type implementing [`Modulus`], declared with
//! [`define_modulus!`]. All derived constants (`R mod Q`, `R² mod Q`,
//! `R³ mod Q`, `-Q⁻¹ mod 2^64`) are computed at compile time from the modulus
//! literal; an even or zero modulus fails to compile, which is exactly the
//! `gcd(R, Q) = 1` requirement.
//!
//! `Mod<M>` stores `x · R mod Q` with `R = 2^(64 · limb_count)`. Addition,
//! subtraction, negation and multiplication are branch-free: the
//! subtract-on-overflow / add-on-underflow adjustments are masked by the
//! carry or borrow bit rather than tested.

use core::fmt;
use core::marker::PhantomData;

use num_traits::{One, Zero};

use crate::core::limb::{limb_mask, Limb, MAX_LIMBS};
use crate::core::num::{
    add_assign, cmp_limbs, cond_add_assign, cond_sub_assign, div_rem, invert_modulo, is_zero,
    montgomery_reduce, mul_into, select_assign, sub_assign, sub_into,
};
use crate::ints::uint::{SInt, UInt};

/// Statistical security parameter for drowned/uniform sampling, in bits.
pub const STATISTICAL_SECURITY: u32 = 80;

/// Storage of a modular residue: a little-endian limb array.
pub trait Repr:
    Copy + Clone + PartialEq + Eq + core::hash::Hash + Send + Sync + fmt::Debug + 'static
{
    const LIMBS: usize;
    const ZERO: Self;
    fn as_limbs(&self) -> &[Limb];
    fn as_limbs_mut(&mut self) -> &mut [Limb];
}

impl<const N: usize> Repr for [Limb; N] {
    const LIMBS: usize = N;
    const ZERO: Self = [0; N];

    fn as_limbs(&self) -> &[Limb] {
        self
    }

    fn as_limbs_mut(&mut self) -> &mut [Limb] {
        self
    }
}

/// A compile-time modulus and its derived Montgomery constants.
pub trait Modulus: Copy + Clone + PartialEq + Eq + fmt::Debug + Send + Sync + 'static {
    type Repr: Repr;

    const MODULUS: Self::Repr;
    /// Bit width of `Q - 1` (the width of stored residues).
    const BITS: u32;
    const LIMBS: usize = <Self::Repr as Repr>::LIMBS;
    /// `-Q⁻¹ mod 2^64`.
    const NEG_INV: Limb;
    /// `R mod Q` — the Montgomery form of one.
    const R1: Self::Repr;
    /// `R² mod Q` — converts into Montgomery form by one reduction.
    const R2: Self::Repr;
    /// `R³ mod Q` — converts an inverse into Montgomery form.
    const R3: Self::Repr;
    /// `Q >> 1`, for the centered signed conversion.
    const HALF: Self::Repr;
}

/// A modulus additionally admitting 2^TWO_ADICITY-th roots of unity, which is
/// what the negacyclic NTT over `Z_Q[X]/(X^N + 1)` needs for `2N` dividing
/// `2^TWO_ADICITY`.
pub trait NttModulus: Modulus {
    const TWO_ADICITY: u32;
    /// Standard-form residue of order exactly `2^TWO_ADICITY`.
    const ROOT: Self::Repr;
}

/// Declare a modulus type: `define_modulus!(pub struct Q17, 1, "17");`.
/// The second argument is the limb count, the third the modulus literal
/// (binary, hex, or decimal with `_` separators).
#[macro_export]
macro_rules! define_modulus {
    ($(#[$meta:meta])* $vis:vis struct $name:ident, $limbs:literal, $value:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        $vis struct $name;

        impl $crate::ints::Modulus for $name {
            type Repr = [$crate::core::Limb; $limbs];

            const MODULUS: Self::Repr = $crate::ints::literals::parse_limbs($value);
            const BITS: u32 = {
                let q = Self::MODULUS;
                assert!(!$crate::core::num::is_zero(&q), "modulus must be nonzero");
                assert!(q[0] & 1 == 1, "modulus must be odd so that gcd(R, Q) = 1");
                assert!($limbs <= $crate::core::MAX_LIMBS, "modulus too wide");
                $crate::core::num::bit_len(&q)
            };
            const NEG_INV: $crate::core::Limb =
                $crate::core::num::neg_inv_limb(Self::MODULUS[0]);
            const R1: Self::Repr = {
                let mut r = [0; $limbs];
                $crate::core::num::pow2_mod(&mut r, 64 * $limbs as u32, &Self::MODULUS);
                r
            };
            const R2: Self::Repr = {
                let mut r = [0; $limbs];
                $crate::core::num::pow2_mod(&mut r, 128 * $limbs as u32, &Self::MODULUS);
                r
            };
            const R3: Self::Repr = {
                let mut r = [0; $limbs];
                $crate::core::num::pow2_mod(&mut r, 192 * $limbs as u32, &Self::MODULUS);
                r
            };
            const HALF: Self::Repr = {
                let mut r = [0; $limbs];
                $crate::core::num::shr_into(&mut r, &Self::MODULUS, 1);
                r
            };
        }
    };
}

/// Declare an NTT-friendly modulus: `define_modulus!` plus the two-adicity
/// and a root of unity of order `2^two_adicity`, whose order is verified at
/// compile time.
#[macro_export]
macro_rules! define_ntt_modulus {
    ($(#[$meta:meta])* $vis:vis struct $name:ident, $limbs:literal, $value:expr,
     two_adicity = $adicity:literal, root = $root:expr) => {
        $crate::define_modulus!($(#[$meta])* $vis struct $name, $limbs, $value);

        impl $crate::ints::NttModulus for $name {
            const TWO_ADICITY: u32 = {
                let root: [$crate::core::Limb; $limbs] =
                    $crate::ints::literals::parse_limbs($root);
                assert!(
                    $crate::ints::modular::root_has_two_power_order(
                        &root,
                        $adicity,
                        &<Self as $crate::ints::Modulus>::MODULUS,
                    ),
                    "root does not have order 2^two_adicity modulo the modulus"
                );
                $adicity
            };
            const ROOT: Self::Repr = $crate::ints::literals::parse_limbs($root);
        }
    };
}

/// Check `root^(2^(s-1)) == -1 (mod q)` (hence order exactly `2^s`).
/// Compile-time helper for [`define_ntt_modulus!`].
pub const fn root_has_two_power_order(root: &[Limb], s: u32, q: &[Limb]) -> bool {
    assert!(s >= 1);
    let k = q.len();
    let mut x = [0 as Limb; MAX_LIMBS];
    let mut i = 0;
    while i < k {
        x[i] = root[i];
        i += 1;
    }
    // Square s - 1 times modulo q.
    let mut e = 0;
    while e < s - 1 {
        let mut t = [0 as Limb; 2 * MAX_LIMBS];
        mul_into(split_mut(&mut t, 2 * k), split(&x, k), split(&x, k));
        let mut rem = [0 as Limb; MAX_LIMBS];
        let mut quo = [0 as Limb; 2 * MAX_LIMBS];
        div_rem(&mut quo, split_mut(&mut rem, k), split(&t, 2 * k), q);
        x = rem;
        e += 1;
    }
    // x must equal q - 1.
    let mut minus_one = [0 as Limb; MAX_LIMBS];
    {
        let m = split_mut(&mut minus_one, k);
        sub_into(m, q, &[1]);
    }
    let mut i = 0;
    while i < k {
        if x[i] != minus_one[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn split(a: &[Limb], n: usize) -> &[Limb] {
    a.split_at(n).0
}

const fn split_mut(a: &mut [Limb], n: usize) -> &mut [Limb] {
    a.split_at_mut(n).0
}

/// An element of `Z_Q` in Montgomery form.
pub struct Mod<M: Modulus> {
    limbs: M::Repr,
    _marker: PhantomData<M>,
}

impl<M: Modulus> Clone for Mod<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Modulus> Copy for Mod<M> {}

impl<M: Modulus> PartialEq for Mod<M> {
    fn eq(&self, other: &Self) -> bool {
        // Residues are kept reduced, so the representation is canonical.
        self.limbs == other.limbs
    }
}

impl<M: Modulus> Eq for Mod<M> {}

impl<M: Modulus> core::hash::Hash for Mod<M> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.limbs.hash(state);
    }
}

impl<M: Modulus> Default for Mod<M> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<M: Modulus> Mod<M> {
    pub const ZERO: Self = Self { limbs: <M::Repr as Repr>::ZERO, _marker: PhantomData };

    pub const ONE: Self = Self { limbs: M::R1, _marker: PhantomData };

    /// Construct directly from Montgomery-form limbs (must be `< Q`).
    pub fn from_montgomery(limbs: M::Repr) -> Self {
        debug_assert!(matches!(
            cmp_limbs(limbs.as_limbs(), M::MODULUS.as_limbs()),
            core::cmp::Ordering::Less
        ));
        Self { limbs, _marker: PhantomData }
    }

    pub fn montgomery_limbs(&self) -> &M::Repr {
        &self.limbs
    }

    fn k() -> usize {
        <M::Repr as Repr>::LIMBS
    }

    /// Convert an unsigned value of any width into Montgomery form.
    pub fn from_limbs(value: &[Limb]) -> Self {
        let k = Self::k();
        let q = M::MODULUS;
        let q = q.as_limbs();
        let mut out = Self::ZERO;
        if value.len() <= k {
            // One multiplication by R² and one reduction.
            let mut t = [0 as Limb; 4 * MAX_LIMBS];
            mul_into(&mut t[..2 * k], value, M::R2.as_limbs());
            montgomery_reduce(out.limbs.as_limbs_mut(), &mut t[..2 * k + 1], q, M::NEG_INV, k);
        } else {
            // Wide input: reduce by R' = 2^(64L) first, then fix up with
            // R' · R² mod Q so the net factor is R.
            let l = value.len();
            assert!(l <= 3 * MAX_LIMBS);
            let mut t = [0 as Limb; 4 * MAX_LIMBS + 1];
            t[..l].copy_from_slice(value);
            let mut y = Self::ZERO;
            montgomery_reduce(y.limbs.as_limbs_mut(), &mut t[..l + k + 1], q, M::NEG_INV, l);

            // c = 2^(64L) · R² mod Q (setup-path arithmetic, not secret).
            let mut pw = [0 as Limb; MAX_LIMBS];
            crate::core::num::pow2_mod(&mut pw[..k], (64 * l) as u32, q);
            let mut prod = [0 as Limb; 2 * MAX_LIMBS];
            mul_into(&mut prod[..2 * k], &pw[..k], M::R2.as_limbs());
            let mut c = [0 as Limb; MAX_LIMBS];
            let mut quo = [0 as Limb; 2 * MAX_LIMBS];
            div_rem(&mut quo, &mut c[..k], &prod[..2 * k], q);

            let mut t = [0 as Limb; 4 * MAX_LIMBS];
            mul_into(&mut t[..2 * k], y.limbs.as_limbs(), &c[..k]);
            montgomery_reduce(out.limbs.as_limbs_mut(), &mut t[..2 * k + 1], q, M::NEG_INV, k);
        }
        out
    }

    pub fn from_uint<const B: u32, const L: usize>(value: &UInt<B, L>) -> Self {
        Self::from_limbs(value.as_limbs())
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_limbs(&[value])
    }

    /// Montgomery-reduce a uniformly random wide value. The map is injective
    /// in each residue class, so a uniform `value` in `[0, 2^(64L))` with
    /// enough drowning bits yields a (statistically) uniform residue.
    pub fn from_uniform(value: &[Limb]) -> Self {
        let k = Self::k();
        let l = value.len();
        let iters = l.max(k);
        assert!(iters + k + 1 <= 4 * MAX_LIMBS);
        let mut t = [0 as Limb; 4 * MAX_LIMBS];
        t[..l].copy_from_slice(value);
        let mut out = Self::ZERO;
        montgomery_reduce(
            out.limbs.as_limbs_mut(),
            &mut t[..iters + k + 1],
            M::MODULUS.as_limbs(),
            M::NEG_INV,
            iters,
        );
        out
    }

    /// Convert a signed value. For `B < BITS` this adds `Q` under the sign
    /// mask and proceeds as unsigned, without branching on the value. Wider
    /// values are offset by the next multiple of `Q` above `2^(B-1)` first,
    /// again under the sign mask.
    pub fn from_sint<const B: u32, const L: usize>(value: &SInt<B, L>) -> Self {
        Self::from_signed_limbs(value.as_limbs(), B)
    }

    /// Runtime-width variant of [`Mod::from_sint`]: `value` is a normalized
    /// two's-complement integer of `bits` bits.
    pub fn from_signed_limbs(value: &[Limb], bits: u32) -> Self {
        assert!(bits >= 1);
        let k = Self::k();
        let l = value.len();
        assert_eq!(l, crate::core::limb::limbs_for(bits));
        let top = (bits - 1) % 64;
        let ext = limb_mask((value[l - 1] >> top) & 1 == 1);
        // Normalize the top limb so the sign extension is explicit.
        let mut value_n = [0 as Limb; 3 * MAX_LIMBS];
        value_n[..l].copy_from_slice(value);
        if bits % 64 != 0 {
            let keep = (1 << (bits % 64)) - 1;
            value_n[l - 1] = (value_n[l - 1] & keep) | (ext & !keep);
        }
        let value = &value_n[..l];
        if bits < M::BITS {
            let mut wide = [0 as Limb; MAX_LIMBS];
            for (i, limb) in wide[..k].iter_mut().enumerate() {
                *limb = if i < l { value[i] } else { ext };
            }
            // wide + Q·[neg] wraps two's complement back into [0, Q).
            cond_add_assign(&mut wide[..k], M::MODULUS.as_limbs(), ext);
            return Self::from_limbs(&wide[..k]);
        }

        // offset = next multiple of Q above 2^(bits-1); depends only on the
        // width, not the value.
        let lw = l + 1;
        assert!(lw < 3 * MAX_LIMBS);
        let mut pw = [0 as Limb; MAX_LIMBS];
        crate::core::num::pow2_mod(&mut pw[..k], bits - 1, M::MODULUS.as_limbs());
        let mut offset = [0 as Limb; MAX_LIMBS];
        if !is_zero(&pw[..k]) {
            sub_into(&mut offset[..k], M::MODULUS.as_limbs(), &pw[..k]);
        }
        let mut multiple = [0 as Limb; 3 * MAX_LIMBS];
        crate::core::num::shl_into(&mut multiple[..lw], &[1], bits - 1);
        let carry = add_assign(&mut multiple[..lw], &offset[..k]);
        assert!(!carry);

        // wide = value (sign-extended two's complement) + multiple·[neg];
        // for negatives the two's-complement excess 2^(64·lw) cancels
        // against the wrap-around of the addition.
        let mut wide = [0 as Limb; 3 * MAX_LIMBS];
        for (i, limb) in wide[..lw].iter_mut().enumerate() {
            *limb = if i < l { value[i] } else { ext };
        }
        for limb in multiple[..lw].iter_mut() {
            *limb &= ext;
        }
        add_assign(&mut wide[..lw], &multiple[..lw]);
        Self::from_limbs(&wide[..lw])
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_sint(&SInt::<65, 2>::from_i64(value))
    }

    /// Standard representative in `[0, Q)` as limbs.
    pub fn to_limbs(&self) -> M::Repr {
        let k = Self::k();
        let mut t = [0 as Limb; 4 * MAX_LIMBS];
        t[..k].copy_from_slice(self.limbs.as_limbs());
        let mut out = <M::Repr as Repr>::ZERO;
        montgomery_reduce(
            out.as_limbs_mut(),
            &mut t[..2 * k + 1],
            M::MODULUS.as_limbs(),
            M::NEG_INV,
            k,
        );
        out
    }

    /// Centered representative in `(-Q/2, Q/2]`, as limbs plus a sign bit:
    /// subtracts `Q` under the mask of `value > Q/2`.
    pub fn to_centered_limbs(&self) -> (M::Repr, bool) {
        let v = self.to_limbs();
        let gt = matches!(cmp_limbs(v.as_limbs(), M::HALF.as_limbs()), core::cmp::Ordering::Greater);
        let mut out = v;
        cond_sub_assign(out.as_limbs_mut(), M::MODULUS.as_limbs(), limb_mask(gt));
        (out, gt)
    }

    /// Centered representative as `i64`; only meaningful when it fits.
    pub fn to_centered_i64(&self) -> i64 {
        let (limbs, _neg) = self.to_centered_limbs();
        limbs.as_limbs()[0] as i64
    }

    /// Standard representative as a fixed-width unsigned integer; `B` must
    /// cover the modulus width.
    pub fn to_uint<const B: u32, const L: usize>(&self) -> UInt<B, L> {
        assert!(B >= M::BITS);
        let v = self.to_limbs();
        let mut limbs = [0; L];
        for (i, limb) in v.as_limbs().iter().enumerate() {
            limbs[i] = *limb;
        }
        UInt::from_limbs(limbs)
    }

    /// Centered representative in `(-Q/2, Q/2]` as a signed integer of at
    /// least the modulus width.
    pub fn to_sint<const B: u32, const L: usize>(&self) -> SInt<B, L> {
        assert!(B >= M::BITS);
        let (v, negative) = self.to_centered_limbs();
        let ext = limb_mask(negative);
        let mut limbs = [ext; L];
        for (i, limb) in v.as_limbs().iter().enumerate() {
            limbs[i] = *limb;
        }
        SInt::from_limbs(limbs)
    }

    pub fn is_zero_value(&self) -> bool {
        is_zero(self.limbs.as_limbs())
    }

    /// Multiplicative inverse via the extended Euclidean algorithm, then one
    /// Montgomery multiplication by `R³` to land back in Montgomery form.
    /// Asserts invertibility (numerical routines do not recover).
    pub fn invert(&self) -> Self {
        let k = Self::k();
        let standard = self.to_limbs();
        let mut g = [0 as Limb; MAX_LIMBS];
        let mut inv = [0 as Limb; MAX_LIMBS];
        invert_modulo(&mut g[..k], &mut inv[..k], standard.as_limbs(), M::MODULUS.as_limbs());
        assert!(
            bit_is_one(&g[..k]),
            "element is not invertible modulo Q (gcd with the modulus is not 1)"
        );
        let mut t = [0 as Limb; 4 * MAX_LIMBS];
        mul_into(&mut t[..2 * k], &inv[..k], M::R3.as_limbs());
        let mut out = Self::ZERO;
        montgomery_reduce(
            out.limbs.as_limbs_mut(),
            &mut t[..2 * k + 1],
            M::MODULUS.as_limbs(),
            M::NEG_INV,
            k,
        );
        out
    }

    /// Square-and-multiply over the bits of `exp`.
    pub fn pow(&self, mut exp: u64) -> Self {
        let mut result = Self::ONE;
        let mut base = *self;
        while exp != 0 {
            if exp & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            exp >>= 1;
        }
        result
    }
}

const fn bit_is_one(a: &[Limb]) -> bool {
    if a.is_empty() || a[0] != 1 {
        return false;
    }
    let mut i = 1;
    while i < a.len() {
        if a[i] != 0 {
            return false;
        }
        i += 1;
    }
    true
}

impl<M: Modulus> core::ops::Add for Mod<M> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl<M: Modulus> core::ops::AddAssign for Mod<M> {
    fn add_assign(&mut self, rhs: Self) {
        let r = self.limbs.as_limbs_mut();
        let carry = add_assign(r, rhs.limbs.as_limbs());
        // sum in [0, 2Q): subtract Q under the mask of (carry | sum >= Q).
        let mut diff = [0 as Limb; MAX_LIMBS];
        let diff = &mut diff[..r.len()];
        let borrow = sub_into(diff, r, M::MODULUS.as_limbs());
        let keep_sum = !carry & borrow;
        select_assign(r, diff, limb_mask(!keep_sum));
    }
}

impl<M: Modulus> core::ops::Sub for Mod<M> {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl<M: Modulus> core::ops::SubAssign for Mod<M> {
    fn sub_assign(&mut self, rhs: Self) {
        let r = self.limbs.as_limbs_mut();
        let borrow = sub_assign(r, rhs.limbs.as_limbs());
        // Add Q back under the borrow mask.
        cond_add_assign(r, M::MODULUS.as_limbs(), limb_mask(borrow));
    }
}

impl<M: Modulus> core::ops::Neg for Mod<M> {
    type Output = Self;

    fn neg(self) -> Self {
        // (Q masked by [self != 0]) - self
        let nonzero = !is_zero(self.limbs.as_limbs());
        let mut out = Self::ZERO;
        let r = out.limbs.as_limbs_mut();
        cond_add_assign(r, M::MODULUS.as_limbs(), limb_mask(nonzero));
        sub_assign(r, self.limbs.as_limbs());
        out
    }
}

impl<M: Modulus> core::ops::Mul for Mod<M> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let k = Self::k();
        let mut t = [0 as Limb; 4 * MAX_LIMBS];
        mul_into(&mut t[..2 * k], self.limbs.as_limbs(), rhs.limbs.as_limbs());
        let mut out = Self::ZERO;
        montgomery_reduce(
            out.limbs.as_limbs_mut(),
            &mut t[..2 * k + 1],
            M::MODULUS.as_limbs(),
            M::NEG_INV,
            k,
        );
        out
    }
}

impl<M: Modulus> core::ops::MulAssign for Mod<M> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<M: Modulus> Zero for Mod<M> {
    fn zero() -> Self {
        Self::ZERO
    }

    fn is_zero(&self) -> bool {
        self.is_zero_value()
    }
}

impl<M: Modulus> One for Mod<M> {
    fn one() -> Self {
        Self::ONE
    }
}

impl<M: Modulus> fmt::Display for Mod<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::ints::uint::fmt_decimal(self.to_limbs().as_limbs(), false, f)
    }
}

impl<M: Modulus> fmt::Debug for Mod<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mod({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_modulus;

    define_modulus!(struct Q99, 1, "99");
    define_modulus!(struct Q17, 1, "17");
    // 120-bit NTT-friendly prime with two-adicity 20 and a verified root.
    crate::define_ntt_modulus!(
        struct Q120, 2, "0x800000000000000000000002300001",
        two_adicity = 20, root = "0x25af87a2a0f3075a8d40d0138cd2fb"
    );

    #[test]
    fn derived_constants() {
        // Independently computed: R mod 99 = 16, R² mod 99 = 58, R³ mod 99 = 37.
        assert_eq!(<Q99 as Modulus>::R1, [16]);
        assert_eq!(<Q99 as Modulus>::R2, [58]);
        assert_eq!(<Q99 as Modulus>::R3, [37]);
        assert_eq!(<Q99 as Modulus>::NEG_INV, 0x50295fad40a57eb5);
        assert_eq!(<Q99 as Modulus>::BITS, 7);
        assert_eq!(<Q99 as Modulus>::HALF, [49]);
    }

    #[test]
    fn round_trip() {
        for v in 0..99u64 {
            let m = Mod::<Q99>::from_u64(v);
            assert_eq!(m.to_limbs(), [v]);
        }
    }

    #[test]
    fn ring_identities() {
        for a in 0..99u64 {
            let x = Mod::<Q99>::from_u64(a);
            assert_eq!(x + (-x), Mod::ZERO);
            assert_eq!(x - x, Mod::ZERO);
            assert_eq!(x * Mod::ONE, x);
            assert_eq!(x * Mod::ZERO, Mod::ZERO);
            for b in [0u64, 1, 17, 55, 98] {
                let y = Mod::<Q99>::from_u64(b);
                assert_eq!(x + y, y + x);
                assert_eq!(x * y, y * x);
                assert_eq!((x * y).to_limbs(), [(a * b) % 99]);
                assert_eq!((x + y).to_limbs(), [(a + b) % 99]);
                let diff = (x - y).to_limbs()[0];
                assert_eq!(diff, ((a + 99) - b) % 99);
            }
        }
    }

    #[test]
    fn compile_time_inverse() {
        // invert(mod<99>(5)) * mod<99>(5) = 1, with inverse 20.
        let five = Mod::<Q99>::from_u64(5);
        let inv = five.invert();
        assert_eq!(inv.to_limbs(), [20]);
        assert_eq!(inv * five, Mod::ONE);
    }

    #[test]
    fn invert_involution() {
        for v in 1..17u64 {
            let x = Mod::<Q17>::from_u64(v);
            assert_eq!(x.invert().invert(), x);
            assert_eq!(x * x.invert(), Mod::ONE);
        }
    }

    #[test]
    #[should_panic]
    fn invert_non_coprime_asserts() {
        let x = Mod::<Q99>::from_u64(33);
        let _ = x.invert();
    }

    #[test]
    fn pow_square_and_multiply() {
        let x = Mod::<Q17>::from_u64(3);
        assert_eq!(x.pow(0), Mod::ONE);
        assert_eq!(x.pow(16), Mod::ONE);
        assert_eq!(x.pow(8).to_limbs(), [16]); // 3^8 = -1 mod 17
    }

    #[test]
    fn signed_conversions() {
        let m = Mod::<Q99>::from_sint(&SInt::<5, 1>::from_i64(-7));
        assert_eq!(m.to_limbs(), [92]);
        assert_eq!(m.to_centered_i64(), -7);
        let p = Mod::<Q99>::from_sint(&SInt::<5, 1>::from_i64(7));
        assert_eq!(p.to_limbs(), [7]);
        assert_eq!(p.to_centered_i64(), 7);
        // Wider than the modulus: the next-multiple-of-Q offset path.
        let w = Mod::<Q17>::from_sint(&SInt::<8, 1>::from_i64(-100));
        assert_eq!(w.to_limbs(), [(17 - 100i64.rem_euclid(17) as u64) % 17]);
        assert_eq!(Mod::<Q17>::from_i64(-1).to_limbs(), [16]);
        assert_eq!(Mod::<Q17>::from_i64(35).to_limbs(), [1]);
    }

    #[test]
    fn typed_conversions_out() {
        let m = Mod::<Q99>::from_u64(97);
        let u: UInt<7, 1> = m.to_uint();
        assert_eq!(u, UInt::from_u64(97));
        let s: SInt<8, 1> = m.to_sint();
        assert_eq!(s.to_i64(), -2);
        let p: SInt<8, 1> = Mod::<Q99>::from_u64(3).to_sint();
        assert_eq!(p.to_i64(), 3);
    }

    #[test]
    fn multi_limb_arithmetic() {
        // q = 0x800000000000000000000002300001 (120 bits)
        // Independently computed vectors for a = 2^100 + 12345, b = 2^77 + 999.
        let a = Mod::<Q120>::from_limbs(&[12345, 0x0000_0010_0000_0000]);
        let b = Mod::<Q120>::from_limbs(&[999, 0x2000]);
        let prod = a * b;
        assert_eq!(prod.to_limbs(), [0xfc00000000bc2e6f, 0x3e7005fe5fff]);
        let inv = a.invert();
        assert_eq!(inv.to_limbs(), [0xa58f7e900c4efb96, 0x5d0c34c733fb8c]);
        assert_eq!(inv * a, Mod::ONE);
    }

    #[test]
    fn multi_limb_constants() {
        assert_eq!(<Q120 as Modulus>::R1, [0xfffffffba22ffe01, 0x7fffffffffffff]);
        assert_eq!(<Q120 as Modulus>::R2, [0x2400118000040000, 0x13]);
        assert_eq!(<Q120 as Modulus>::R3, [0xffcb7ffffa300001, 0x7fffac427f8d27]);
        assert_eq!(<Q120 as Modulus>::HALF, [0x1180000, 0x40000000000000]);
    }

    #[test]
    fn uniform_reduction_is_reduced() {
        let wide = [u64::MAX; 4];
        let m = Mod::<Q120>::from_uniform(&wide);
        let v = m.to_limbs();
        assert!(matches!(
            cmp_limbs(&v, <Q120 as Modulus>::MODULUS.as_limbs()),
            core::cmp::Ordering::Less
        ));
    }
}
