//! Factorisation of 64-bit integers
//!
//! Trial division by a handful of small primes, then Pollard-Brent rho with
//! Miller-Rabin to certify the prime factors. Used by the Type-1 search to
//! enumerate divisors of p^2 x^2 without trial-dividing x up to sqrt(x).

use crate::primes::{add_mod, is_prime_u64, mul_mod};
use num_integer::Integer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TRIAL_PRIMES: [u64; 15] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

/// Prime factorisation as sorted `(prime, exponent)` pairs.
pub fn factorize(mut n: u64) -> Vec<(u64, u32)> {
    let mut factors: Vec<(u64, u32)> = Vec::new();
    if n <= 1 {
        return factors;
    }

    for &p in &TRIAL_PRIMES {
        if n % p == 0 {
            let mut e = 0;
            while n % p == 0 {
                n /= p;
                e += 1;
            }
            factors.push((p, e));
        }
    }

    if n > 1 {
        // fixed seed keeps factorisation, and therefore every search, deterministic
        let mut rng = StdRng::seed_from_u64(n);
        let mut stack = vec![n];
        let mut primes = Vec::new();
        while let Some(m) = stack.pop() {
            if m == 1 {
                continue;
            }
            if is_prime_u64(m) {
                primes.push(m);
                continue;
            }
            let d = pollard_brent(m, &mut rng);
            stack.push(d);
            stack.push(m / d);
        }
        primes.sort_unstable();
        for p in primes {
            match factors.last_mut() {
                Some((q, e)) if *q == p => *e += 1,
                _ => factors.push((p, 1)),
            }
        }
    }

    factors.sort_unstable();
    factors
}

/// A non-trivial factor of the odd composite `n`.
fn pollard_brent(n: u64, rng: &mut StdRng) -> u64 {
    if n % 2 == 0 {
        return 2;
    }
    loop {
        let c = rng.gen_range(1..n);
        let mut y = rng.gen_range(0..n);
        let m = 128u64;
        let mut g = 1u64;
        let mut r = 1u64;
        let mut q = 1u64;
        let mut x = y;
        let mut ys = y;

        let f = |v: u64| add_mod(mul_mod(v, v, n), c, n);

        while g == 1 {
            x = y;
            for _ in 0..r {
                y = f(y);
            }
            let mut k = 0;
            while k < r && g == 1 {
                ys = y;
                for _ in 0..m.min(r - k) {
                    y = f(y);
                    q = mul_mod(q, x.abs_diff(y), n);
                }
                g = q.gcd(&n);
                k += m;
            }
            r *= 2;
        }

        if g == n {
            // batch overshot; step back one at a time
            loop {
                ys = f(ys);
                g = x.abs_diff(ys).gcd(&n);
                if g > 1 {
                    break;
                }
            }
        }
        if g != n {
            return g;
        }
    }
}

/// Every divisor of the number with factorisation `factors` that is `<= limit`,
/// in no particular order.
pub fn divisors_up_to(factors: &[(u64, u32)], limit: u128) -> Vec<u128> {
    let mut divs: Vec<u128> = vec![1];
    if limit == 0 {
        return Vec::new();
    }
    for &(p, e) in factors {
        let p = u128::from(p);
        let existing = divs.len();
        for i in 0..existing {
            let mut d = divs[i];
            for _ in 0..e {
                match d.checked_mul(p) {
                    Some(next) if next <= limit => {
                        d = next;
                        divs.push(d);
                    }
                    _ => break,
                }
            }
        }
    }
    divs
}

/// Factorisation of `n^2 * x^2`.
pub fn square_factors(n: u64, x: u64) -> Vec<(u64, u32)> {
    let mut factors: Vec<(u64, u32)> = Vec::new();
    for (p, e) in factorize(n).into_iter().chain(factorize(x)) {
        match factors.iter_mut().find(|(q, _)| *q == p) {
            Some((_, acc)) => *acc += 2 * e,
            None => factors.push((p, 2 * e)),
        }
    }
    factors.sort_unstable();
    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(factors: &[(u64, u32)]) -> u128 {
        factors
            .iter()
            .map(|&(p, e)| u128::from(p).pow(e))
            .product()
    }

    #[test]
    fn test_factorize_small() {
        assert!(factorize(1).is_empty());
        assert_eq!(factorize(840), vec![(2, 3), (3, 1), (5, 1), (7, 1)]);
        assert_eq!(factorize(97), vec![(97, 1)]);
    }

    #[test]
    fn test_factorize_semiprime_and_powers() {
        let a = 4_294_967_291u64; // largest prime below 2^32
        let b = 4_294_967_279u64;
        assert_eq!(factorize(a * b), vec![(b, 1), (a, 1)]);

        let n = 1_000_003u64 * 1_000_003 * 999_983;
        assert_eq!(factorize(n), vec![(999_983, 1), (1_000_003, 2)]);
    }

    #[test]
    fn test_factorize_above_2_pow_63() {
        // composites whose rho iteration runs modulo n > 2^63
        for (p, q) in [
            (4_294_967_291u64, 4_294_967_291u64),
            (3_037_000_493, 6_074_000_999),
            (65_537, 281_470_680_808_913),
        ] {
            let n = p * q;
            assert!(n > 1 << 63);
            let f = factorize(n);
            assert_eq!(product(&f), u128::from(n), "n={}", n);
            assert!(f.iter().all(|&(r, _)| is_prime_u64(r)));
        }
    }

    #[test]
    fn test_factorize_products_roundtrip() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let n: u64 = rng.gen_range(2..u64::MAX);
            let f = factorize(n);
            assert_eq!(product(&f), u128::from(n));
            assert!(f.iter().all(|&(p, _)| is_prime_u64(p)));
        }
    }

    #[test]
    fn test_divisors_up_to() {
        let f = factorize(360);
        let mut d = divisors_up_to(&f, u128::MAX);
        d.sort_unstable();
        let expected: Vec<u128> = (1..=360).filter(|k| 360 % k == 0).collect();
        assert_eq!(d, expected);

        let mut small = divisors_up_to(&f, 10);
        small.sort_unstable();
        assert_eq!(small, vec![1, 2, 3, 4, 5, 6, 8, 9, 10]);
    }

    #[test]
    fn test_square_factors() {
        assert_eq!(square_factors(7, 6), vec![(2, 2), (3, 2), (7, 2)]);
        assert_eq!(square_factors(3, 6), vec![(2, 2), (3, 4)]);
        assert_eq!(square_factors(1009, 1), vec![(1009, 2)]);
    }
}
