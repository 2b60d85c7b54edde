//! Modular filter
//!
//! Combines the moduli of an identity table into M = lcm(q_i) and records
//! which residues mod M no identity resolves. Those "hard" residues are the
//! only classes whose primes need the search; every other prime gets its
//! triple straight from a closed form.

use crate::crt::{checked_lcm, totient, CrtPair};
use crate::error::{Error, Result};
use crate::table::IdentityTable;
use num_integer::Integer;
use serde::Serialize;
use tracing::{debug, info};

/// Upper bound on the combined modulus
#[derive(Debug, Clone, Copy)]
pub struct FilterLimits {
    pub max_modulus: u64,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            max_modulus: 1 << 28,
        }
    }
}

/// Fixed-size bitset over `[0, len)`
#[derive(Debug, Clone, PartialEq, Eq)]
struct BitSet {
    words: Vec<u64>,
    len: u64,
}

impl BitSet {
    fn new(len: u64) -> Self {
        Self {
            words: vec![0; len.div_ceil(64) as usize],
            len,
        }
    }

    #[inline]
    fn set(&mut self, i: u64) {
        self.words[(i / 64) as usize] |= 1 << (i % 64);
    }

    #[inline]
    fn get(&self, i: u64) -> bool {
        self.words[(i / 64) as usize] & (1 << (i % 64)) != 0
    }

    fn count(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            let base = wi as u64 * 64;
            let mut bits = w;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = u64::from(bits.trailing_zeros());
                bits &= bits - 1;
                Some(base + tz)
            })
        })
    }
}

/// Classification of a prime by the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Some identity resolves the residue
    Resolved,
    /// No identity resolves the residue; the search must handle it
    Hard,
}

/// Hard residues modulo the combined modulus of a table
#[derive(Debug, Clone)]
pub struct ResidueFilter {
    modulus: u64,
    identities: usize,
    hard: BitSet,
}

/// Summary statistics of a filter
#[derive(Debug, Clone, Serialize)]
pub struct FilterReport {
    pub modulus: u64,
    pub identities: usize,
    pub hard_count: u64,
    pub hard_fraction: f64,
    pub totient: u64,
    pub coprime_hard_count: u64,
    pub coprime_hard_fraction: f64,
}

/// Residues mod `modulus` resolved by no identity of `table`.
fn unresolved(table: &IdentityTable, modulus: u64) -> BitSet {
    let mut resolved = BitSet::new(modulus);
    for id in table.identities() {
        for &r in id.residues() {
            let mut x = r;
            while x < modulus {
                resolved.set(x);
                x += id.modulus;
            }
        }
    }
    let mut hard = BitSet::new(modulus);
    for r in 0..modulus {
        if !resolved.get(r) {
            hard.set(r);
        }
    }
    hard
}

fn combined_modulus(table: &IdentityTable, start: u64, limits: &FilterLimits) -> Result<u64> {
    let mut m = start;
    for id in table.identities() {
        m = checked_lcm(m, id.modulus).ok_or(Error::ModulusTooLarge {
            limit: limits.max_modulus,
        })?;
        if m > limits.max_modulus {
            return Err(Error::ModulusTooLarge {
                limit: limits.max_modulus,
            });
        }
    }
    Ok(m)
}

impl ResidueFilter {
    /// Mark every residue mod lcm(q_i) that no identity resolves.
    pub fn build(table: &IdentityTable, limits: &FilterLimits) -> Result<Self> {
        let modulus = combined_modulus(table, 1, limits)?;
        let hard = unresolved(table, modulus);
        let filter = Self {
            modulus,
            identities: table.len(),
            hard,
        };
        filter.log_report("built");
        Ok(filter)
    }

    /// Deepen the filter with further identities.
    ///
    /// Each currently hard residue is lifted through the CRT against the
    /// residues the new identities leave unresolved; resolved classes never
    /// come back, so the hard fraction cannot grow.
    pub fn refine(&self, extra: &IdentityTable, limits: &FilterLimits) -> Result<Self> {
        let q = combined_modulus(extra, 1, limits)?;
        let pair = CrtPair::new(self.modulus, q).ok_or(Error::ModulusTooLarge {
            limit: limits.max_modulus,
        })?;
        if pair.lcm > limits.max_modulus {
            return Err(Error::ModulusTooLarge {
                limit: limits.max_modulus,
            });
        }

        let extra_hard: Vec<u64> = unresolved(extra, q).iter().collect();
        let mut hard = BitSet::new(pair.lcm);
        for r in self.hard.iter() {
            for &s in &extra_hard {
                if let Some(x) = pair.combine(r, s) {
                    hard.set(x);
                }
            }
        }

        let filter = Self {
            modulus: pair.lcm,
            identities: self.identities + extra.len(),
            hard,
        };
        debug!(
            from = self.modulus,
            to = filter.modulus,
            "lifted hard residues through CRT"
        );
        filter.log_report("refined");
        Ok(filter)
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    pub fn is_hard(&self, n: u64) -> bool {
        self.hard.get(n % self.modulus)
    }

    pub fn classify(&self, n: u64) -> Class {
        if self.is_hard(n) {
            Class::Hard
        } else {
            Class::Resolved
        }
    }

    pub fn hard_count(&self) -> u64 {
        self.hard.count()
    }

    /// Hard residues in increasing order.
    pub fn hard_residues(&self) -> impl Iterator<Item = u64> + '_ {
        self.hard.iter()
    }

    /// Hard residues coprime to the modulus, the only ones primes above M can hit.
    pub fn coprime_hard_residues(&self) -> impl Iterator<Item = u64> + '_ {
        self.hard.iter().filter(|r| r.gcd(&self.modulus) == 1)
    }

    pub fn report(&self) -> FilterReport {
        let hard_count = self.hard_count();
        let coprime_hard_count = self.coprime_hard_residues().count() as u64;
        let phi = totient(self.modulus);
        FilterReport {
            modulus: self.modulus,
            identities: self.identities,
            hard_count,
            hard_fraction: hard_count as f64 / self.modulus as f64,
            totient: phi,
            coprime_hard_count,
            coprime_hard_fraction: coprime_hard_count as f64 / phi as f64,
        }
    }

    fn log_report(&self, what: &str) {
        let r = self.report();
        info!(
            modulus = r.modulus,
            identities = r.identities,
            hard = r.hard_count,
            hard_fraction = r.hard_fraction,
            coprime_hard = r.coprime_hard_count,
            coprime_fraction = r.coprime_hard_fraction,
            "residue filter {}",
            what
        );
    }
}
