//! Randomness: the counter-mode engine and the derived distributions.
//!
//! Every sampler consumes a number of keystream words that depends only on
//! its parameters, never on the sampled values. The planner relies on this:
//! a work item's generator is seeded at `counter = index · blocks_per_item`,
//! and identical expressions replay identical streams.

pub mod chacha;

pub use chacha::{ChaCha, NumberGenerator, BLOCK_WORDS, KEY_WORDS};

use crate::core::limb::limbs_for;
use crate::ints::modular::{Mod, Modulus, STATISTICAL_SECURITY};
use crate::ints::uint::{SInt, UInt};

/// The engine the expression layer derives per-work-item generators from.
pub type DefaultGenerator = NumberGenerator<20, 2>;

/// Keystream words one `bits`-wide uniform draw consumes.
pub const fn words_for_bits(bits: u32) -> usize {
    2 * limbs_for(bits)
}

/// Uniform `UInt`: fill the limbs, mask the top word.
pub fn uniform_uint<const B: u32, const L: usize, const R: u32, const NW: usize>(
    g: &mut NumberGenerator<R, NW>,
) -> UInt<B, L> {
    let limbs = g.uniform_limbs(B);
    let mut arr = [0; L];
    arr.copy_from_slice(&limbs);
    UInt::from_limbs(arr)
}

/// Uniform `SInt` over the full two's-complement range.
pub fn uniform_sint<const B: u32, const L: usize, const R: u32, const NW: usize>(
    g: &mut NumberGenerator<R, NW>,
) -> SInt<B, L> {
    let limbs = g.uniform_limbs(B);
    let mut arr = [0; L];
    arr.copy_from_slice(&limbs);
    SInt::from_limbs(arr)
}

/// Bits a uniform draw over `Z_Q` samples before Montgomery reduction.
pub const fn uniform_mod_bits<M: Modulus>() -> u32 {
    2 * M::BITS + STATISTICAL_SECURITY
}

/// Uniform element of `Z_Q`: a wide drowned sample fed through the
/// Montgomery reducer, which is injective per residue class and so
/// preserves uniformity.
pub fn uniform_mod<M: Modulus, const R: u32, const NW: usize>(
    g: &mut NumberGenerator<R, NW>,
) -> Mod<M> {
    let wide = g.uniform_limbs(uniform_mod_bits::<M>());
    Mod::from_uniform(&wide)
}

/// Keystream words one `Binomial(count)` draw consumes.
pub const fn binomial_words(count: u32) -> usize {
    count.div_ceil(32) as usize
}

/// `Binomial(count)`: the sum of `count` uniform bits.
pub fn binomial<const R: u32, const NW: usize>(
    g: &mut NumberGenerator<R, NW>,
    count: u32,
) -> u32 {
    assert!(count > 0);
    let mut remaining = count;
    let mut sum = 0;
    while remaining > 0 {
        let take = remaining.min(32);
        let word = g.next_word();
        let mask = if take == 32 { u32::MAX } else { (1 << take) - 1 };
        sum += (word & mask).count_ones();
        remaining -= take;
    }
    sum
}

/// Centered binomial with the given variance: `Binomial(4η) − 2η`,
/// symmetric around zero.
pub fn centered_binomial<const R: u32, const NW: usize>(
    g: &mut NumberGenerator<R, NW>,
    variance: u32,
) -> i64 {
    binomial(g, 4 * variance) as i64 - 2 * variance as i64
}

pub const fn centered_binomial_words(variance: u32) -> usize {
    binomial_words(4 * variance)
}

/// Bits a drowned uniform draw samples: the bound's width plus the
/// statistical security margin, plus a sign bit for the symmetric version.
pub const fn drown_uniform_bits(bound_bits: u32, signed: bool) -> u32 {
    bound_bits + STATISTICAL_SECURITY + signed as u32
}

/// Uniform over `[0, 2^(bound_bits + κ))`, reduced into `Z_Q` by value.
/// Statistically hides any addend smaller than the bound.
pub fn drown_unsigned_uniform_mod<M: Modulus, const R: u32, const NW: usize>(
    g: &mut NumberGenerator<R, NW>,
    bound_bits: u32,
) -> Mod<M> {
    let limbs = g.uniform_limbs(drown_uniform_bits(bound_bits, false));
    Mod::from_limbs(&limbs)
}

/// Symmetric drowned uniform: a signed value of `bound_bits + κ + 1` bits,
/// reduced into `Z_Q` by value.
pub fn drown_signed_uniform_mod<M: Modulus, const R: u32, const NW: usize>(
    g: &mut NumberGenerator<R, NW>,
    bound_bits: u32,
) -> Mod<M> {
    let bits = drown_uniform_bits(bound_bits, true);
    let limbs = g.uniform_limbs(bits);
    Mod::from_signed_limbs(&limbs, bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_modulus;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;
    use rand_distr::{Binomial, Distribution};

    define_modulus!(struct Q17, 1, "17");
    define_modulus!(
        struct Q120, 2, "0x800000000000000000000002300001"
    );

    fn generator(seed: u32) -> DefaultGenerator {
        NumberGenerator::new([seed; 8], [0, 1])
    }

    #[test]
    fn uniform_mod_is_unbiased_small() {
        // Chi-square-ish sanity over Z_17.
        let mut g = generator(42);
        let n = 170_000;
        let mut counts = [0u32; 17];
        for _ in 0..n {
            let m: Mod<Q17> = uniform_mod(&mut g);
            counts[m.to_limbs()[0] as usize] += 1;
        }
        let expected = n as f64 / 17.0;
        for &c in &counts {
            assert!((c as f64 - expected).abs() < expected * 0.05);
        }
    }

    #[test]
    fn uniform_mod_multi_limb_reduced() {
        let q = <Q120 as crate::ints::Modulus>::MODULUS;
        let mut g = generator(7);
        for _ in 0..100 {
            let m: Mod<Q120> = uniform_mod(&mut g);
            // Residues stay canonical.
            let v = m.to_limbs();
            assert!(matches!(
                crate::core::num::cmp_limbs(&v, &q),
                core::cmp::Ordering::Less
            ));
        }
    }

    #[test]
    fn centered_binomial_moments() {
        // Symmetric, variance within statistical bounds of η over 2^20 samples.
        let eta = 10u32;
        let n = 1 << 20;
        let mut g = generator(3);
        let mut sum = 0f64;
        let mut sum_sq = 0f64;
        for _ in 0..n {
            let v = centered_binomial(&mut g, eta) as f64;
            assert!(v.abs() <= 2.0 * eta as f64);
            sum += v;
            sum_sq += v * v;
        }
        let mean = sum / n as f64;
        let var = sum_sq / n as f64 - mean * mean;
        assert!(mean.abs() < 0.05, "mean {mean} too far from 0");
        assert!((var - eta as f64).abs() < 0.2, "variance {var} too far from {eta}");

        // Cross-check against the reference binomial from rand_distr.
        let reference = Binomial::new(4 * eta as u64, 0.5).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let mut ref_sum_sq = 0f64;
        for _ in 0..n {
            let v = reference.sample(&mut rng) as f64 - 2.0 * eta as f64;
            ref_sum_sq += v * v;
        }
        let ref_var = ref_sum_sq / n as f64;
        assert!((var - ref_var).abs() < 0.3);
    }

    #[test]
    fn binomial_counts_bits() {
        let mut g = generator(9);
        // Binomial(1) is a fair coin.
        let mut ones = 0;
        for _ in 0..10_000 {
            let b = binomial(&mut g, 1);
            assert!(b <= 1);
            ones += b;
        }
        assert!((ones as f64 - 5_000.0).abs() < 300.0);
    }

    #[test]
    fn word_consumption_is_deterministic() {
        assert_eq!(words_for_bits(64), 2);
        assert_eq!(words_for_bits(65), 4);
        assert_eq!(binomial_words(40), 2);
        assert_eq!(centered_binomial_words(10), 2);

        // Two generators drawing the same distributions stay in lockstep.
        let mut a = generator(5);
        let mut b = generator(5);
        for _ in 0..10 {
            let _ = centered_binomial(&mut a, 10);
            for _ in 0..centered_binomial_words(10) {
                b.next_word();
            }
        }
        assert_eq!(a.next_word(), b.next_word());
    }

    #[test]
    fn drowned_sampling_reduces() {
        let mut g = generator(11);
        let m: Mod<Q17> = drown_signed_uniform_mod(&mut g, 3);
        let _ = m.to_limbs();
        let u: Mod<Q120> = drown_unsigned_uniform_mod(&mut g, 60);
        let _ = u.to_limbs();
    }

    #[test]
    fn thread_rng_seeds_keys() {
        // Key material for queues comes from the OS RNG.
        let mut rng = rand::thread_rng();
        let key: [u32; 8] = core::array::from_fn(|_| rng.gen());
        let mut g = NumberGenerator::<20, 2>::new(key, [0, 0]);
        let _ = g.next_word();
    }
}
