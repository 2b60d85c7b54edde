//! Chinese Remainder Theorem combination
//!
//! Garner-style lifting of a residue modulo `m1` and a residue modulo `m2` to
//! the unique residue modulo `lcm(m1, m2)`. Moduli need not be coprime; pairs
//! that disagree on `gcd(m1, m2)` have no common lift.

use num_integer::Integer;

/// Precomputed combination data for a fixed pair of moduli
#[derive(Debug, Clone)]
pub struct CrtPair {
    pub m1: u64,
    pub m2: u64,
    /// gcd(m1, m2)
    pub g: u64,
    /// lcm(m1, m2)
    pub lcm: u64,
    /// (m1 / g)^(-1) mod (m2 / g)
    inv: u64,
}

impl CrtPair {
    /// Prepare combination for `m1`, `m2`. Returns `None` when either modulus is
    /// zero or the lcm does not fit in a `u64`.
    pub fn new(m1: u64, m2: u64) -> Option<Self> {
        if m1 == 0 || m2 == 0 {
            return None;
        }
        let g = m1.gcd(&m2);
        let lcm = checked_lcm(m1, m2)?;
        let m2g = m2 / g;
        let inv = if m2g == 1 {
            0
        } else {
            mod_inverse((m1 / g) % m2g, m2g)?
        };
        Some(Self { m1, m2, g, lcm, inv })
    }

    /// The residue x mod lcm with x ≡ r1 (mod m1) and x ≡ r2 (mod m2).
    pub fn combine(&self, r1: u64, r2: u64) -> Option<u64> {
        let (r1, r2) = (r1 % self.m1, r2 % self.m2);
        if r1 % self.g != r2 % self.g {
            return None;
        }
        let m2g = self.m2 / self.g;
        if m2g == 1 {
            return Some(r1);
        }

        // t = ((r2 - r1) / g) * inv mod (m2 / g)
        let diff = (r2 as i128 - r1 as i128) / self.g as i128;
        let diff = diff.rem_euclid(m2g as i128) as u128;
        let t = diff * self.inv as u128 % m2g as u128;

        // x = r1 + m1 * t < m1 * (m2 / g) = lcm
        Some((r1 as u128 + self.m1 as u128 * t) as u64)
    }
}

/// lcm(a, b), or `None` on overflow or a zero argument.
pub fn checked_lcm(a: u64, b: u64) -> Option<u64> {
    if a == 0 || b == 0 {
        return None;
    }
    (a / a.gcd(&b)).checked_mul(b)
}

/// Modular inverse using the extended Euclidean algorithm
pub fn mod_inverse(a: u64, m: u64) -> Option<u64> {
    if m == 0 {
        return None;
    }
    let (g, x, _) = extended_gcd(a as i128, m as i128);
    if g != 1 {
        return None;
    }
    Some(x.rem_euclid(m as i128) as u64)
}

/// Extended Euclidean algorithm: (g, x, y) with a*x + b*y = g
pub fn extended_gcd(a: i128, b: i128) -> (i128, i128, i128) {
    if b == 0 {
        (a, 1, 0)
    } else {
        let (g, x, y) = extended_gcd(b, a % b);
        (g, y, x - (a / b) * y)
    }
}

/// Euler's totient of a modulus small enough to factor by trial division.
pub fn totient(mut n: u64) -> u64 {
    let mut result = n;
    let mut p = 2u64;
    while p * p <= n {
        if n % p == 0 {
            while n % p == 0 {
                n /= p;
            }
            result -= result / p;
        }
        p += 1;
    }
    if n > 1 {
        result -= result / n;
    }
    result
}
