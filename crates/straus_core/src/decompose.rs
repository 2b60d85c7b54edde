//! Decomposition records

use crate::error::{Error, Result};
use crate::natural::Natural;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a decomposition was found
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    Identity,
    Type1,
    BruteForce,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Identity => "identity",
            Method::Type1 => "type1",
            Method::BruteForce => "brute-force",
        };
        f.write_str(s)
    }
}

/// Verified `4/p = 1/a + 1/b + 1/c` with `a <= b <= c`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    pub prime: u64,
    pub a: Natural,
    pub b: Natural,
    pub c: Natural,
    pub method: Method,
}

/// `4abc == n(bc + ac + ab)` with every term positive.
pub fn satisfies(n: u64, a: &Natural, b: &Natural, c: &Natural) -> bool {
    if n == 0 || a.is_zero() || b.is_zero() || c.is_zero() {
        return false;
    }
    let lhs = &(&(a * b) * c) * 4;
    let sum = &(&(b * c) + &(a * c)) + &(a * b);
    lhs == &sum * n
}

impl Decomposition {
    /// Sort the triple and verify it; a triple that fails is an arithmetic error.
    pub fn new(prime: u64, triple: [Natural; 3], method: Method) -> Result<Self> {
        let mut v = triple;
        v.sort();
        let [a, b, c] = v;
        let d = Self {
            prime,
            a,
            b,
            c,
            method,
        };
        if !d.verify() {
            return Err(Error::Arithmetic(format!(
                "({}, {}, {}) from {} does not decompose 4/{}",
                d.a, d.b, d.c, method, prime
            )));
        }
        Ok(d)
    }

    /// Re-check the equation and the ordering.
    pub fn verify(&self) -> bool {
        self.a <= self.b && self.b <= self.c && satisfies(self.prime, &self.a, &self.b, &self.c)
    }
}

impl fmt::Display for Decomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "4/{} = 1/{} + 1/{} + 1/{}",
            self.prime, self.a, self.b, self.c
        )
    }
}
