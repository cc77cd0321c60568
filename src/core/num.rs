//! Multi-limb arithmetic.
//!
//! Two layers live here. The `const fn` layer works on plain limb slices and
//! is what compile-time constant derivation (Montgomery parameters, literal
//! parsing, division, GCDs) evaluates; the same functions are called at run
//! time for root-table setup and modular kernels. The span layer works on
//! [`LimbRead`] views and handles mixed widths and signedness for the integer
//! types.
//!
//! Division, GCD and modular inversion are variable-time and exist for
//! constant derivation and setup, never for secret-dependent data.

use core::cmp::Ordering;

use super::limb::{adc, limb_mask, mac, mul_wide, sbb, Bit, Limb, LIMB_BITS, MAX_LIMBS};
use super::span::{BitSliceMut, LimbRead};

// --- const slice layer ------------------------------------------------------

/// `r = a + b` (zero-extended), truncated to `r.len()`; returns the carry out
/// of the last written limb.
pub const fn add_into(r: &mut [Limb], a: &[Limb], b: &[Limb]) -> Bit {
    let mut carry = false;
    let mut i = 0;
    while i < r.len() {
        let x = if i < a.len() { a[i] } else { 0 };
        let y = if i < b.len() { b[i] } else { 0 };
        let (s, c) = adc(x, y, carry);
        r[i] = s;
        carry = c;
        i += 1;
    }
    carry
}

/// `r += a`; returns the carry out.
pub const fn add_assign(r: &mut [Limb], a: &[Limb]) -> Bit {
    let mut carry = false;
    let mut i = 0;
    while i < r.len() {
        let y = if i < a.len() { a[i] } else { 0 };
        let (s, c) = adc(r[i], y, carry);
        r[i] = s;
        carry = c;
        i += 1;
    }
    carry
}

/// `r -= a`; returns the borrow.
pub const fn sub_assign(r: &mut [Limb], a: &[Limb]) -> Bit {
    let mut borrow = false;
    let mut i = 0;
    while i < r.len() {
        let y = if i < a.len() { a[i] } else { 0 };
        let (d, bo) = sbb(r[i], y, borrow);
        r[i] = d;
        borrow = bo;
        i += 1;
    }
    borrow
}

/// `r = a - b` (zero-extended), truncated to `r.len()`; returns the borrow.
pub const fn sub_into(r: &mut [Limb], a: &[Limb], b: &[Limb]) -> Bit {
    let mut borrow = false;
    let mut i = 0;
    while i < r.len() {
        let x = if i < a.len() { a[i] } else { 0 };
        let y = if i < b.len() { b[i] } else { 0 };
        let (d, bo) = sbb(x, y, borrow);
        r[i] = d;
        borrow = bo;
        i += 1;
    }
    borrow
}

/// `r -= a & mask` lane-wise; the mask is a whole-limb bit mask. This is the
/// branch-free conditional subtraction used by modular arithmetic.
pub const fn cond_sub_assign(r: &mut [Limb], a: &[Limb], mask: Limb) -> Bit {
    let mut borrow = false;
    let mut i = 0;
    while i < r.len() {
        let y = if i < a.len() { a[i] & mask } else { 0 };
        let (d, bo) = sbb(r[i], y, borrow);
        r[i] = d;
        borrow = bo;
        i += 1;
    }
    borrow
}

/// `r += a & mask` lane-wise.
pub const fn cond_add_assign(r: &mut [Limb], a: &[Limb], mask: Limb) -> Bit {
    let mut carry = false;
    let mut i = 0;
    while i < r.len() {
        let y = if i < a.len() { a[i] & mask } else { 0 };
        let (s, c) = adc(r[i], y, carry);
        r[i] = s;
        carry = c;
        i += 1;
    }
    carry
}

/// Lane-wise `r = select(mask, a, r)`.
pub const fn select_assign(r: &mut [Limb], a: &[Limb], mask: Limb) {
    let mut i = 0;
    while i < r.len() {
        let x = if i < a.len() { a[i] } else { 0 };
        r[i] = (x & mask) | (r[i] & !mask);
        i += 1;
    }
}

/// Schoolbook `r = a * b`, truncated to `r.len()`. `r` is cleared first.
pub const fn mul_into(r: &mut [Limb], a: &[Limb], b: &[Limb]) {
    let mut i = 0;
    while i < r.len() {
        r[i] = 0;
        i += 1;
    }
    let mut i = 0;
    while i < a.len() {
        if i >= r.len() {
            break;
        }
        let mut carry = 0;
        let mut j = 0;
        while j < b.len() && i + j < r.len() {
            let (lo, hi) = mac(a[i], b[j], r[i + j], carry);
            r[i + j] = lo;
            carry = hi;
            j += 1;
        }
        if i + j < r.len() {
            r[i + j] = carry;
        }
        i += 1;
    }
}

/// Unsigned comparison with zero extension.
pub const fn cmp_limbs(a: &[Limb], b: &[Limb]) -> Ordering {
    let n = if a.len() > b.len() { a.len() } else { b.len() };
    let mut i = n;
    while i > 0 {
        i -= 1;
        let x = if i < a.len() { a[i] } else { 0 };
        let y = if i < b.len() { b[i] } else { 0 };
        if x < y {
            return Ordering::Less;
        }
        if x > y {
            return Ordering::Greater;
        }
    }
    Ordering::Equal
}

pub const fn is_zero(a: &[Limb]) -> bool {
    let mut i = 0;
    while i < a.len() {
        if a[i] != 0 {
            return false;
        }
        i += 1;
    }
    true
}

/// Position of the highest set bit plus one; 0 for zero.
pub const fn bit_len(a: &[Limb]) -> u32 {
    let mut i = a.len();
    while i > 0 {
        i -= 1;
        if a[i] != 0 {
            return i as u32 * LIMB_BITS + (LIMB_BITS - a[i].leading_zeros());
        }
    }
    0
}

pub const fn trailing_zeros(a: &[Limb]) -> u32 {
    let mut i = 0;
    while i < a.len() {
        if a[i] != 0 {
            return i as u32 * LIMB_BITS + a[i].trailing_zeros();
        }
        i += 1;
    }
    a.len() as u32 * LIMB_BITS
}

/// `r = a << s`, truncated to `r.len()`; limb shift then combined bit shift.
pub const fn shl_into(r: &mut [Limb], a: &[Limb], s: u32) {
    let limb_shift = (s / LIMB_BITS) as usize;
    let bit_shift = s % LIMB_BITS;
    let mut i = r.len();
    while i > 0 {
        i -= 1;
        let lo = if i >= limb_shift && i - limb_shift < a.len() { a[i - limb_shift] } else { 0 };
        r[i] = if bit_shift == 0 {
            lo
        } else {
            let lower =
                if i >= limb_shift + 1 && i - limb_shift - 1 < a.len() { a[i - limb_shift - 1] } else { 0 };
            (lo << bit_shift) | (lower >> (LIMB_BITS - bit_shift))
        };
    }
}

/// `r = a >> s` (logical), truncated to `r.len()`.
pub const fn shr_into(r: &mut [Limb], a: &[Limb], s: u32) {
    let limb_shift = (s / LIMB_BITS) as usize;
    let bit_shift = s % LIMB_BITS;
    let mut i = 0;
    while i < r.len() {
        let lo = if i + limb_shift < a.len() { a[i + limb_shift] } else { 0 };
        r[i] = if bit_shift == 0 {
            lo
        } else {
            let hi = if i + limb_shift + 1 < a.len() { a[i + limb_shift + 1] } else { 0 };
            (lo >> bit_shift) | (hi << (LIMB_BITS - bit_shift))
        };
        i += 1;
    }
}

// --- division and GCDs (setup / compile time) -------------------------------

/// Long division with a divisor normalized to the top bit of its top limb;
/// unnormalized inputs are pre-shifted and the remainder post-shifted back.
///
/// Quotient is written to `q` (caller-sized, truncating), remainder to `r`
/// (at least as many limbs as the divisor). Divisor must be nonzero.
pub const fn div_rem(q: &mut [Limb], r: &mut [Limb], num: &[Limb], den: &[Limb]) {
    assert!(!is_zero(den), "division by zero");
    assert!(num.len() <= 2 * MAX_LIMBS && den.len() <= MAX_LIMBS);

    let mut i = 0;
    while i < q.len() {
        q[i] = 0;
        i += 1;
    }
    let mut i = 0;
    while i < r.len() {
        r[i] = 0;
        i += 1;
    }

    let dbits = bit_len(den);
    let d = ((dbits + LIMB_BITS - 1) / LIMB_BITS) as usize;

    // Numerator narrower than the divisor: quotient is zero.
    if num.len() < d || matches!(cmp_limbs(num, den), Ordering::Less) {
        let mut i = 0;
        while i < r.len() {
            r[i] = if i < num.len() { num[i] } else { 0 };
            i += 1;
        }
        return;
    }

    // Single-limb divisor: direct base-2^64 short division.
    if d == 1 {
        let den0 = den[0];
        let mut rem: u128 = 0;
        let mut i = num.len();
        while i > 0 {
            i -= 1;
            let cur = (rem << LIMB_BITS) | num[i] as u128;
            let qd = (cur / den0 as u128) as Limb;
            rem = cur % den0 as u128;
            if i < q.len() {
                q[i] = qd;
            } else {
                assert!(qd == 0, "quotient does not fit");
            }
        }
        if !r.is_empty() {
            r[0] = rem as Limb;
        }
        return;
    }

    // Normalize so the divisor's top limb has its high bit set.
    let shift = d as u32 * LIMB_BITS - dbits;
    let mut vn = [0 as Limb; MAX_LIMBS];
    shl_into(split_mut(&mut vn, d), den, shift);
    let mut un = [0 as Limb; 2 * MAX_LIMBS + 1];
    let m = num.len();
    shl_into(split_mut(&mut un, m + 1), num, shift);

    let vtop = vn[d - 1];
    let vnext = vn[d - 2];

    let mut j = m - d + 1;
    while j > 0 {
        j -= 1;
        // Estimate the quotient digit from the top three numerator limbs,
        // clamp to the digit range, and refine against the next divisor
        // limb; any remaining overestimate is off by one and fixed by the
        // add-back below.
        let top = ((un[j + d] as u128) << LIMB_BITS) | un[j + d - 1] as u128;
        let mut qhat: u128 = top / vtop as u128;
        let mut rhat: u128 = top % vtop as u128;
        if qhat >> LIMB_BITS != 0 {
            qhat = (1u128 << LIMB_BITS) - 1;
            rhat = top - qhat * vtop as u128;
        }
        while rhat >> LIMB_BITS == 0
            && qhat * vnext as u128 > ((rhat << LIMB_BITS) | un[j + d - 2] as u128)
        {
            qhat -= 1;
            rhat += vtop as u128;
        }

        // un[j .. j+d+1] -= qhat * vn
        let mut borrow: Limb = 0;
        let mut carry: Limb = 0;
        let mut i = 0;
        while i < d {
            let (plo, phi) = mul_wide(qhat as Limb, vn[i]);
            let (p, c1) = adc(plo, carry, false);
            carry = phi + c1 as Limb;
            let (diff, b) = sbb(un[j + i], p, borrow != 0);
            un[j + i] = diff;
            borrow = b as Limb;
            i += 1;
        }
        let (diff, b) = sbb(un[j + d], carry, borrow != 0);
        un[j + d] = diff;

        let mut qd = qhat as Limb;
        if b {
            // Estimate was one too large; add the divisor back.
            qd -= 1;
            let mut carry = false;
            let mut i = 0;
            while i < d {
                let (s, c) = adc(un[j + i], vn[i], carry);
                un[j + i] = s;
                carry = c;
                i += 1;
            }
            un[j + d] = un[j + d].wrapping_add(carry as Limb);
        }

        if j < q.len() {
            q[j] = qd;
        } else {
            assert!(qd == 0, "quotient does not fit");
        }
    }

    // Denormalize the remainder.
    let mut rem = [0 as Limb; MAX_LIMBS];
    shr_into(split_mut(&mut rem, d), split(&un, d), shift);
    let mut i = 0;
    while i < r.len() {
        r[i] = if i < d { rem[i] } else { 0 };
        i += 1;
    }
}

const fn split(a: &[Limb], n: usize) -> &[Limb] {
    a.split_at(n).0
}

const fn split_mut(a: &mut [Limb], n: usize) -> &mut [Limb] {
    a.split_at_mut(n).0
}

/// Binary GCD over trailing-zero counts. Result in `out` (zero-padded).
pub const fn gcd(out: &mut [Limb], a: &[Limb], b: &[Limb]) {
    assert!(a.len() <= MAX_LIMBS + 1 && b.len() <= MAX_LIMBS + 1);
    let mut x = [0 as Limb; MAX_LIMBS + 1];
    let mut y = [0 as Limb; MAX_LIMBS + 1];
    let mut i = 0;
    while i < a.len() {
        x[i] = a[i];
        i += 1;
    }
    let mut i = 0;
    while i < b.len() {
        y[i] = b[i];
        i += 1;
    }

    let mut i = 0;
    while i < out.len() {
        out[i] = 0;
        i += 1;
    }

    if is_zero(&x) {
        let mut i = 0;
        while i < out.len() && i < y.len() {
            out[i] = y[i];
            i += 1;
        }
        return;
    }
    if is_zero(&y) {
        let mut i = 0;
        while i < out.len() && i < x.len() {
            out[i] = x[i];
            i += 1;
        }
        return;
    }

    let zx = trailing_zeros(&x);
    let zy = trailing_zeros(&y);
    let common = if zx < zy { zx } else { zy };
    let mut t = [0 as Limb; MAX_LIMBS + 1];
    shr_into(&mut t, &x, zx);
    x = t;
    shr_into(&mut t, &y, zy);
    y = t;

    loop {
        // Both odd here.
        if matches!(cmp_limbs(&x, &y), Ordering::Greater) {
            let tmp = x;
            x = y;
            y = tmp;
        }
        sub_into(&mut t, &y, &x);
        y = t;
        if is_zero(&y) {
            break;
        }
        let z = trailing_zeros(&y);
        shr_into(&mut t, &y, z);
        y = t;
    }

    let mut res = [0 as Limb; MAX_LIMBS + 1];
    shl_into(&mut res, &x, common);
    let mut i = 0;
    while i < out.len() && i < res.len() {
        out[i] = res[i];
        i += 1;
    }
}

/// Extended Euclid: writes gcd(a, m) to `g` and, when the gcd is 1, the
/// inverse of `a` modulo `m` to `inv`. Coefficients are tracked modulo `m`
/// in two alternating non-negative tuples, so no signed intermediates
/// appear. `m` must be nonzero and `inv.len() >= m`'s limb count.
pub const fn invert_modulo(g: &mut [Limb], inv: &mut [Limb], a: &[Limb], m: &[Limb]) {
    assert!(m.len() <= MAX_LIMBS && a.len() <= 2 * MAX_LIMBS);
    let k = m.len();

    // r0 = m, r1 = a mod m
    let mut r0 = [0 as Limb; MAX_LIMBS];
    let mut i = 0;
    while i < k {
        r0[i] = m[i];
        i += 1;
    }
    let mut r1 = [0 as Limb; MAX_LIMBS];
    {
        let mut qq = [0 as Limb; 2 * MAX_LIMBS];
        div_rem(&mut qq, split_mut(&mut r1, k), a, m);
    }

    // t0 = 0, t1 = 1 (mod m)
    let mut t0 = [0 as Limb; MAX_LIMBS];
    let mut t1 = [0 as Limb; MAX_LIMBS];
    t1[0] = 1;

    while !is_zero(split(&r1, k)) {
        let mut q = [0 as Limb; MAX_LIMBS];
        let mut rem = [0 as Limb; MAX_LIMBS];
        div_rem(split_mut(&mut q, k), split_mut(&mut rem, k), split(&r0, k), split(&r1, k));

        // t_next = (t0 - q * t1) mod m, computed as t0 + (m - (q * t1 mod m)).
        let mut prod = [0 as Limb; 2 * MAX_LIMBS];
        mul_into(split_mut(&mut prod, 2 * k), split(&q, k), split(&t1, k));
        let mut qt = [0 as Limb; MAX_LIMBS];
        {
            let mut qq = [0 as Limb; 2 * MAX_LIMBS];
            div_rem(&mut qq, split_mut(&mut qt, k), split(&prod, 2 * k), m);
        }
        let mut neg_qt = [0 as Limb; MAX_LIMBS];
        if !is_zero(split(&qt, k)) {
            sub_into(split_mut(&mut neg_qt, k), m, split(&qt, k));
        }
        let mut sum = [0 as Limb; MAX_LIMBS + 1];
        add_into(split_mut(&mut sum, k + 1), split(&t0, k), split(&neg_qt, k));
        let mut t_next = [0 as Limb; MAX_LIMBS];
        {
            let mut qq = [0 as Limb; 2 * MAX_LIMBS];
            div_rem(&mut qq, split_mut(&mut t_next, k), split(&sum, k + 1), m);
        }

        t0 = t1;
        t1 = t_next;
        r0 = r1;
        r1 = rem;
    }

    let mut i = 0;
    while i < g.len() {
        g[i] = if i < k { r0[i] } else { 0 };
        i += 1;
    }
    let mut i = 0;
    while i < inv.len() {
        inv[i] = if i < k { t0[i] } else { 0 };
        i += 1;
    }
}

// --- Montgomery -------------------------------------------------------------

/// `-q^{-1} mod 2^64` for odd `q`, by Newton iteration on the low limb.
pub const fn neg_inv_limb(q0: Limb) -> Limb {
    assert!(q0 & 1 == 1, "modulus must be odd (gcd(R, Q) = 1)");
    let mut x: Limb = q0; // correct to 3 bits
    let mut i = 0;
    while i < 6 {
        x = x.wrapping_mul(2u64.wrapping_sub(q0.wrapping_mul(x)));
        i += 1;
    }
    x.wrapping_neg()
}

/// Multi-precision REDC: given `t < R' * q` with `R' = 2^(64 * iterations)`,
/// computes `t * R'^{-1} mod q` into `out`. `t` is clobbered and must hold
/// at least `iterations + q.len() + 1` limbs (zero-padded above the value).
/// A final masked subtraction brings the result into `[0, q)`.
pub const fn montgomery_reduce(
    out: &mut [Limb],
    t: &mut [Limb],
    q: &[Limb],
    neg_inv: Limb,
    iterations: usize,
) {
    let k = q.len();
    assert!(t.len() >= iterations + k + 1);
    assert!(out.len() == k);

    let mut i = 0;
    while i < iterations {
        let m = t[i].wrapping_mul(neg_inv);
        let mut carry: Limb = 0;
        let mut j = 0;
        while j < k {
            let (lo, hi) = mac(m, q[j], t[i + j], carry);
            t[i + j] = lo;
            carry = hi;
            j += 1;
        }
        // Propagate the carry through the rest of t.
        let mut j = i + k;
        let mut c = carry;
        while c != 0 && j < t.len() {
            let (s, ov) = t[j].overflowing_add(c);
            t[j] = s;
            c = ov as Limb;
            j += 1;
        }
        i += 1;
    }

    let mut i = 0;
    while i < k {
        out[i] = t[iterations + i];
        i += 1;
    }
    let extra = t[iterations + k];

    // out + extra * 2^(64k) is < 2q; subtract q when the value is >= q.
    let ge = extra != 0 || !matches!(cmp_limbs(out, q), Ordering::Less);
    cond_sub_assign(out, q, limb_mask(ge));
}

/// `2^exp mod q` by repeated doubling; used for Montgomery constant
/// derivation at compile time.
pub const fn pow2_mod(out: &mut [Limb], exp: u32, q: &[Limb]) {
    let k = q.len();
    assert!(out.len() == k);
    let mut i = 0;
    while i < k {
        out[i] = 0;
        i += 1;
    }
    // 1 mod q (q > 1 for any Montgomery modulus)
    out[0] = 1;
    cond_sub_assign(out, q, limb_mask(!matches!(cmp_limbs(out, q), Ordering::Less)));

    let mut e = 0;
    while e < exp {
        let mut doubled = [0 as Limb; MAX_LIMBS + 1];
        let d = split_mut(&mut doubled, k + 1);
        add_into(d, out, out);
        let ge = !matches!(cmp_limbs(d, q), Ordering::Less);
        cond_sub_assign(d, q, limb_mask(ge));
        let mut i = 0;
        while i < k {
            out[i] = doubled[i];
            i += 1;
        }
        e += 1;
    }
}

// --- span layer -------------------------------------------------------------

/// `r = a + b + carry_in` over spans, sign-extending shorter operands;
/// returns the carry out of the last written limb.
pub fn add_spans(r: &mut BitSliceMut<'_>, a: &impl LimbRead, b: &impl LimbRead, carry_in: Bit) -> Bit {
    let mut carry = carry_in;
    for i in 0..r.limb_count() {
        let (s, c) = adc(a.extended(i), b.extended(i), carry);
        r.write(i, s);
        carry = c;
    }
    carry
}

/// `r = a - b - borrow_in` over spans; returns the borrow.
pub fn sub_spans(r: &mut BitSliceMut<'_>, a: &impl LimbRead, b: &impl LimbRead, borrow_in: Bit) -> Bit {
    let mut borrow = borrow_in;
    for i in 0..r.limb_count() {
        let (d, bo) = sbb(a.extended(i), b.extended(i), borrow);
        r.write(i, d);
        borrow = bo;
    }
    borrow
}

/// Schoolbook `r = a * b` over unsigned spans, truncated to `r`'s width.
pub fn mul_spans(r: &mut BitSliceMut<'_>, a: &impl LimbRead, b: &impl LimbRead) {
    let n = r.limb_count();
    let mut acc = vec![0 as Limb; n];
    for i in 0..a.limb_count().min(n) {
        let mut carry: Limb = 0;
        let ai = a.read(i);
        for j in 0..b.limb_count() {
            if i + j >= n {
                break;
            }
            let (lo, hi) = mac(ai, b.read(j), acc[i + j], carry);
            acc[i + j] = lo;
            carry = hi;
        }
        if i + b.limb_count() < n {
            acc[i + b.limb_count()] = carry;
        }
    }
    for (i, limb) in acc.into_iter().enumerate() {
        r.write(i, limb);
    }
}

/// Sign-aware comparison: differing signs decide immediately, then limbs are
/// scanned from the most significant end.
pub fn cmp_spans(a: &impl LimbRead, b: &impl LimbRead) -> Ordering {
    match (a.sign(), b.sign()) {
        (false, true) => return Ordering::Greater,
        (true, false) => return Ordering::Less,
        _ => {}
    }
    let n = a.limb_count().max(b.limb_count());
    for i in (0..n).rev() {
        match a.extended(i).cmp(&b.extended(i)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Widening/truncating copy: `r = a`, sign-extended through `r`'s width.
pub fn copy_spans(r: &mut BitSliceMut<'_>, a: &impl LimbRead) {
    for i in 0..r.limb_count() {
        r.write(i, a.extended(i));
    }
}
