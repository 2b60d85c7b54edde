//! Overflow-free natural numbers
//!
//! `Natural` keeps values that fit in a `u128` as a native word and promotes to
//! `BigUint` only when a checked word operation overflows. Results are demoted
//! back to a word whenever they fit, so the representation of a value is
//! unique and the fast path is chosen purely by magnitude.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul};
use std::str::FromStr;

/// Non-negative integer of unbounded width.
///
/// Invariant: `Big` only ever holds values greater than `u128::MAX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Natural {
    Word(u128),
    Big(BigUint),
}

impl Natural {
    pub fn zero() -> Self {
        Natural::Word(0)
    }

    pub fn one() -> Self {
        Natural::Word(1)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Natural::Word(0))
    }

    /// True when the value is held as a native word.
    pub fn is_word(&self) -> bool {
        matches!(self, Natural::Word(_))
    }

    pub fn to_u128(&self) -> Option<u128> {
        match self {
            Natural::Word(w) => Some(*w),
            Natural::Big(_) => None,
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.to_u128().and_then(|w| u64::try_from(w).ok())
    }

    pub fn to_biguint(&self) -> BigUint {
        match self {
            Natural::Word(w) => BigUint::from(*w),
            Natural::Big(b) => b.clone(),
        }
    }

    /// Number of significant bits.
    pub fn bits(&self) -> u64 {
        match self {
            Natural::Word(w) => u64::from(128 - w.leading_zeros()),
            Natural::Big(b) => b.bits(),
        }
    }

    fn from_big(b: BigUint) -> Self {
        match b.to_u128() {
            Some(w) => Natural::Word(w),
            None => Natural::Big(b),
        }
    }

    /// `self - other`, or `None` when the result would be negative.
    pub fn checked_sub(&self, other: &Natural) -> Option<Natural> {
        match (self, other) {
            (Natural::Word(a), Natural::Word(b)) => a.checked_sub(*b).map(Natural::Word),
            _ => {
                if self < other {
                    None
                } else {
                    Some(Natural::from_big(self.to_biguint() - other.to_biguint()))
                }
            }
        }
    }

    /// Euclidean quotient and remainder; `None` for a zero divisor.
    pub fn div_rem(&self, divisor: &Natural) -> Option<(Natural, Natural)> {
        if divisor.is_zero() {
            return None;
        }
        match (self, divisor) {
            (Natural::Word(a), Natural::Word(d)) => {
                Some((Natural::Word(a / d), Natural::Word(a % d)))
            }
            _ => {
                let (q, r) = self.to_biguint().div_rem(&divisor.to_biguint());
                Some((Natural::from_big(q), Natural::from_big(r)))
            }
        }
    }

    /// Quotient when `divisor` divides `self` exactly.
    pub fn div_exact(&self, divisor: &Natural) -> Option<Natural> {
        let (q, r) = self.div_rem(divisor)?;
        r.is_zero().then_some(q)
    }

    /// `self mod m` for a word-sized modulus. `m` must be non-zero.
    pub fn rem_u64(&self, m: u64) -> u64 {
        debug_assert!(m != 0);
        match self {
            Natural::Word(w) => (w % u128::from(m)) as u64,
            Natural::Big(b) => (b % m).to_u64().unwrap_or(0),
        }
    }

    pub fn gcd(&self, other: &Natural) -> Natural {
        match (self, other) {
            (Natural::Word(a), Natural::Word(b)) => Natural::Word(a.gcd(b)),
            _ => Natural::from_big(self.to_biguint().gcd(&other.to_biguint())),
        }
    }
}

impl Default for Natural {
    fn default() -> Self {
        Natural::zero()
    }
}

impl PartialOrd for Natural {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Natural {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Natural::Word(a), Natural::Word(b)) => a.cmp(b),
            (Natural::Word(_), Natural::Big(_)) => Ordering::Less,
            (Natural::Big(_), Natural::Word(_)) => Ordering::Greater,
            (Natural::Big(a), Natural::Big(b)) => a.cmp(b),
        }
    }
}

impl From<u64> for Natural {
    fn from(n: u64) -> Self {
        Natural::Word(u128::from(n))
    }
}

impl From<u128> for Natural {
    fn from(n: u128) -> Self {
        Natural::Word(n)
    }
}

impl From<u32> for Natural {
    fn from(n: u32) -> Self {
        Natural::Word(u128::from(n))
    }
}

impl From<BigUint> for Natural {
    fn from(n: BigUint) -> Self {
        Natural::from_big(n)
    }
}

impl fmt::Display for Natural {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Natural::Word(w) => write!(f, "{}", w),
            Natural::Big(b) => write!(f, "{}", b),
        }
    }
}

impl FromStr for Natural {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u128>() {
            Ok(w) => Ok(Natural::Word(w)),
            Err(_) => s.parse::<BigUint>().map(Natural::from_big),
        }
    }
}

impl Add for &Natural {
    type Output = Natural;

    fn add(self, other: Self) -> Natural {
        if let (Natural::Word(a), Natural::Word(b)) = (self, other) {
            if let Some(s) = a.checked_add(*b) {
                return Natural::Word(s);
            }
        }
        Natural::from_big(self.to_biguint() + other.to_biguint())
    }
}

impl Add for Natural {
    type Output = Natural;

    fn add(self, other: Self) -> Natural {
        &self + &other
    }
}

impl Add<u64> for &Natural {
    type Output = Natural;

    fn add(self, other: u64) -> Natural {
        self + &Natural::from(other)
    }
}

impl Mul for &Natural {
    type Output = Natural;

    fn mul(self, other: Self) -> Natural {
        if let (Natural::Word(a), Natural::Word(b)) = (self, other) {
            if let Some(p) = a.checked_mul(*b) {
                return Natural::Word(p);
            }
        }
        Natural::from_big(self.to_biguint() * other.to_biguint())
    }
}

impl Mul for Natural {
    type Output = Natural;

    fn mul(self, other: Self) -> Natural {
        &self * &other
    }
}

impl Mul<u64> for &Natural {
    type Output = Natural;

    fn mul(self, other: u64) -> Natural {
        self * &Natural::from(other)
    }
}

impl Serialize for Natural {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Natural {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn big(n: &Natural) -> BigUint {
        n.to_biguint()
    }

    #[test]
    fn test_word_overflow_promotes() {
        let max = Natural::from(u128::MAX);
        let sum = &max + &Natural::one();
        assert!(!sum.is_word());
        assert_eq!(big(&sum), BigUint::from(u128::MAX) + 1u32);

        let sq = &max * &max;
        assert_eq!(big(&sq), BigUint::from(u128::MAX) * BigUint::from(u128::MAX));
    }

    #[test]
    fn test_results_demote_to_word() {
        let max = Natural::from(u128::MAX);
        let sq = &max * &max;
        let (q, r) = sq.div_rem(&max).unwrap();
        assert_eq!(q, max);
        assert!(q.is_word());
        assert!(r.is_zero());
    }

    #[test]
    fn test_product_beyond_1e57() {
        // 4abc for a triple produced by a prime near 10^19
        let p = Natural::from(9_999_999_999_999_999_967u64);
        let a = &(&p * &p) * 3;
        let cube = &(&a * &a) * &a;
        assert!(cube.bits() > 190);
        assert_eq!(cube.div_exact(&a).unwrap(), &a * &a);
    }

    #[test]
    fn test_checked_sub() {
        let a = Natural::from(5u64);
        let b = Natural::from(7u64);
        assert_eq!(a.checked_sub(&b), None);
        assert_eq!(b.checked_sub(&a), Some(Natural::from(2u64)));

        let huge = &Natural::from(u128::MAX) * 4;
        let back = huge.checked_sub(&Natural::from(u128::MAX)).unwrap();
        assert_eq!(big(&back), BigUint::from(u128::MAX) * 3u32);
    }

    #[test]
    fn test_division_by_zero_is_none() {
        assert!(Natural::from(10u64).div_rem(&Natural::zero()).is_none());
        assert!(Natural::from(10u64).div_exact(&Natural::from(3u64)).is_none());
    }

    #[test]
    fn test_ordering_across_representations() {
        let word = Natural::from(u128::MAX);
        let bigv = &word + &Natural::one();
        assert!(word < bigv);
        assert!(bigv > Natural::zero());
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let n = &Natural::from(u128::MAX) * 10;
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, format!("\"{}\"", n));
        let back: Natural = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn test_rem_and_gcd() {
        let n = &Natural::from(u128::MAX) * 840;
        assert_eq!(n.rem_u64(840), 0);
        assert_eq!(n.rem_u64(7), 0);
        let g = Natural::from(84u64).gcd(&Natural::from(120u64));
        assert_eq!(g, Natural::from(12u64));
    }

    proptest! {
        #[test]
        fn prop_mul_matches_biguint(a in any::<u128>(), b in any::<u128>(), c in any::<u64>()) {
            let (na, nb, nc) = (Natural::from(a), Natural::from(b), Natural::from(c));
            let prod = &(&na * &nb) * &nc;
            prop_assert_eq!(big(&prod), BigUint::from(a) * BigUint::from(b) * BigUint::from(c));
        }

        #[test]
        fn prop_div_rem_reconstructs(a in any::<u128>(), b in any::<u128>(), d in 1u128..) {
            let n = &Natural::from(a) * &Natural::from(b);
            let dn = Natural::from(d);
            let (q, r) = n.div_rem(&dn).unwrap();
            prop_assert!(r < dn);
            prop_assert_eq!(&(&q * &dn) + &r, n);
        }

        #[test]
        fn prop_add_sub_inverse(a in any::<u128>(), b in any::<u128>()) {
            let (na, nb) = (Natural::from(a), Natural::from(b));
            let sum = &na + &nb;
            prop_assert_eq!(sum.checked_sub(&nb), Some(na));
        }
    }
}
