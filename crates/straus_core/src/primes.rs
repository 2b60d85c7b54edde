//! Prime generation
//!
//! Base primes up to sqrt(hi) and a segmented sieve that emits the primes of
//! an arbitrary half-open range `[lo, hi)` window by window, so memory stays
//! bounded by the window size even for ranges near 2^64.

use crate::error::{Error, Result};
use num_integer::Roots;

/// Default sieve window (numbers per window)
pub const DEFAULT_WINDOW: u64 = 1 << 22;

/// Sieving primes up to a limit, stored as `u32` since sqrt(2^64) = 2^32.
#[derive(Debug, Clone)]
pub struct SmallPrimes {
    primes: Vec<u32>,
    limit: u64,
}

impl SmallPrimes {
    /// All primes `<= limit` (clamped to `u32::MAX`).
    pub fn up_to(limit: u64) -> Self {
        let limit = limit.min(u64::from(u32::MAX));
        let base = simple_sieve(limit.sqrt());

        let mut primes: Vec<u32> = Vec::new();
        let mut out = Vec::new();
        let mut lo = 2u64;
        while lo <= limit {
            let hi = (lo + DEFAULT_WINDOW).min(limit + 1);
            out.clear();
            sieve_window(&base, lo, hi, &mut out);
            primes.extend(out.iter().map(|&p| p as u32));
            lo = hi;
        }

        Self { primes, limit }
    }

    /// Base primes sufficient to sieve every number below `hi`.
    pub fn for_range_end(hi: u64) -> Self {
        Self::up_to(hi.saturating_sub(1).sqrt())
    }

    /// True when these primes can sieve every number below `hi`.
    pub fn covers(&self, hi: u64) -> bool {
        hi.saturating_sub(1).sqrt() <= self.limit
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.primes
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }
}

/// Segmented sieve over shared, read-only base primes
#[derive(Debug, Clone, Copy)]
pub struct SegmentedSieve<'a> {
    small: &'a SmallPrimes,
    window: u64,
}

impl<'a> SegmentedSieve<'a> {
    pub fn new(small: &'a SmallPrimes, window: u64) -> Self {
        Self {
            small,
            window: window.max(1),
        }
    }

    /// Iterate the primes of `[lo, hi)` one window at a time.
    pub fn windows(&self, lo: u64, hi: u64) -> Result<Windows<'a>> {
        if lo > hi {
            return Err(Error::InvalidRange { lo, hi });
        }
        if !self.small.covers(hi) {
            return Err(Error::Arithmetic(format!(
                "base primes up to {} cannot sieve below {}",
                self.small.limit, hi
            )));
        }
        Ok(Windows {
            small: self.small,
            window: self.window,
            next: lo,
            hi,
        })
    }

    /// All primes of `[lo, hi)` in increasing order.
    pub fn primes(&self, lo: u64, hi: u64) -> Result<Vec<u64>> {
        Ok(self.windows(lo, hi)?.flatten().collect())
    }
}

/// Iterator over the primes of consecutive sieve windows
pub struct Windows<'a> {
    small: &'a SmallPrimes,
    window: u64,
    next: u64,
    hi: u64,
}

impl Iterator for Windows<'_> {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Vec<u64>> {
        if self.next >= self.hi {
            return None;
        }
        let lo = self.next;
        let hi = lo.saturating_add(self.window).min(self.hi);
        self.next = hi;

        let mut out = Vec::new();
        sieve_window(&self.small.primes, lo, hi, &mut out);
        Some(out)
    }
}

/// Sieve `[lo, hi)` with `base`, appending primes to `out`.
///
/// `base` must contain every prime up to sqrt(hi - 1).
fn sieve_window(base: &[u32], lo: u64, hi: u64, out: &mut Vec<u64>) {
    if hi <= lo {
        return;
    }
    let len = (hi - lo) as usize;
    let mut composite = vec![false; len];

    for &p in base {
        let p = u64::from(p);
        let sq = u128::from(p) * u128::from(p);
        if sq >= u128::from(hi) {
            break;
        }
        // first multiple of p in the window, never below p^2
        let first = (u128::from(lo) + u128::from(p) - 1) / u128::from(p) * u128::from(p);
        let start = first.max(sq);
        if start >= u128::from(hi) {
            continue;
        }
        let mut j = (start - u128::from(lo)) as usize;
        let step = p as usize;
        while j < len {
            composite[j] = true;
            j += step;
        }
    }

    for (i, &c) in composite.iter().enumerate() {
        let n = lo + i as u64;
        if !c && n >= 2 {
            out.push(n);
        }
    }
}

/// Plain sieve of Eratosthenes for the base primes
fn simple_sieve(limit: u64) -> Vec<u32> {
    if limit < 2 {
        return Vec::new();
    }
    let n = limit as usize;
    let mut is_prime = vec![true; n + 1];
    is_prime[0] = false;
    is_prime[1] = false;
    let mut i = 2;
    while i * i <= n {
        if is_prime[i] {
            let mut j = i * i;
            while j <= n {
                is_prime[j] = false;
                j += i;
            }
        }
        i += 1;
    }
    is_prime
        .iter()
        .enumerate()
        .filter(|(_, &b)| b)
        .map(|(i, _)| i as u32)
        .collect()
}

#[inline]
pub(crate) fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    (u128::from(a) * u128::from(b) % u128::from(m)) as u64
}

/// `(a + b) mod m` for `a, b < m`, safe for moduli above 2^63.
#[inline]
pub(crate) fn add_mod(a: u64, b: u64, m: u64) -> u64 {
    let (sum, carry) = a.overflowing_add(b);
    if carry || sum >= m {
        sum.wrapping_sub(m)
    } else {
        sum
    }
}

pub(crate) fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut result = 1 % m;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    result
}

/// Deterministic Miller-Rabin for the full `u64` range
pub fn is_prime_u64(n: u64) -> bool {
    const BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

    if n < 2 {
        return false;
    }
    for &p in &BASES {
        if n % p == 0 {
            return n == p;
        }
    }

    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }

    'witness: for &a in &BASES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_primes(lo: u64, hi: u64) -> Vec<u64> {
        (lo..hi)
            .filter(|&n| n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0))
            .collect()
    }

    #[test]
    fn test_small_primes() {
        let sp = SmallPrimes::up_to(100);
        assert_eq!(sp.len(), 25);
        assert_eq!(sp.as_slice()[..5], [2, 3, 5, 7, 11]);
        assert_eq!(*sp.as_slice().last().unwrap(), 97);
    }

    #[test]
    fn test_segmented_matches_naive_unaligned() {
        let sp = SmallPrimes::for_range_end(10_000);
        for window in [1u64, 7, 64, 1000, DEFAULT_WINDOW] {
            let sieve = SegmentedSieve::new(&sp, window);
            for (lo, hi) in [(0, 100), (1, 2), (2, 3), (97, 1013), (9_000, 10_000), (5, 5)] {
                assert_eq!(
                    sieve.primes(lo, hi).unwrap(),
                    naive_primes(lo, hi),
                    "window={} range=[{}, {})",
                    window,
                    lo,
                    hi
                );
            }
        }
    }

    #[test]
    fn test_prime_count_to_1e6() {
        let sp = SmallPrimes::for_range_end(1_000_000);
        let sieve = SegmentedSieve::new(&sp, 65_536);
        assert_eq!(sieve.primes(0, 1_000_000).unwrap().len(), 78_498);
    }

    #[test]
    fn test_window_near_u64_max_needs_base_primes() {
        // base primes up to 2^16 cannot sieve this high
        let lo = u64::MAX - 1_000;
        let sp = SmallPrimes::up_to(1 << 16);
        let sieve = SegmentedSieve::new(&sp, 256);
        assert!(sieve.windows(lo, u64::MAX).is_err());
    }

    #[test]
    fn test_window_above_2_pow_40_matches_miller_rabin() {
        let lo = (1u64 << 40) - 5_000;
        let hi = (1u64 << 40) + 5_000;
        let sp = SmallPrimes::for_range_end(hi);
        let sieve = SegmentedSieve::new(&sp, 777);
        let expected: Vec<u64> = (lo..hi).filter(|&n| is_prime_u64(n)).collect();
        assert!(!expected.is_empty());
        assert_eq!(sieve.primes(lo, hi).unwrap(), expected);
    }

    /// Sieves with every prime below 2^32, so it needs about a gigabyte.
    #[test]
    #[ignore]
    fn test_window_near_u64_max_matches_miller_rabin() {
        let lo = u64::MAX - 2_000;
        let sp = SmallPrimes::for_range_end(u64::MAX);
        assert!(sp.covers(u64::MAX));
        let sieve = SegmentedSieve::new(&sp, 256);

        let expected: Vec<u64> = (lo..u64::MAX).filter(|&n| is_prime_u64(n)).collect();
        assert_eq!(*expected.last().unwrap(), 18_446_744_073_709_551_557);
        assert_eq!(sieve.primes(lo, u64::MAX).unwrap(), expected);
    }

    #[test]
    fn test_resume_from_boundary_skips_earlier_windows() {
        let sp = SmallPrimes::for_range_end(200_000);
        let sieve = SegmentedSieve::new(&sp, 10_000);
        let full = sieve.primes(2, 200_000).unwrap();
        let boundary = 123_457;
        let resumed = sieve.primes(boundary, 200_000).unwrap();
        let tail: Vec<u64> = full.into_iter().filter(|&p| p >= boundary).collect();
        assert_eq!(resumed, tail);
    }

    #[test]
    fn test_range_validation() {
        let sp = SmallPrimes::up_to(10);
        let sieve = SegmentedSieve::new(&sp, 16);
        assert!(sieve.windows(10, 5).is_err());
        assert!(sieve.windows(0, 1_000).is_err());
        assert!(sieve.windows(0, 121).is_ok());
    }

    #[test]
    fn test_add_mod_wide_modulus() {
        let m = u64::MAX - 58;
        assert_eq!(add_mod(m - 1, m - 1, m), m - 2);
        assert_eq!(add_mod(m - 1, 1, m), 0);
        assert_eq!(add_mod(3, 4, 10), 7);
        assert_eq!(add_mod(6, 4, 10), 0);
    }

    #[test]
    fn test_miller_rabin() {
        let small = naive_primes(0, 5_000);
        for n in 0..5_000u64 {
            assert_eq!(is_prime_u64(n), small.binary_search(&n).is_ok(), "n={}", n);
        }
        // strong pseudoprime to many bases
        assert!(!is_prime_u64(3_215_031_751));
        assert!(is_prime_u64(1_000_000_007));
        assert!(is_prime_u64(9_999_999_999_999_999_961));
        assert!(!is_prime_u64(9_999_999_999_999_999_963));
    }
}
