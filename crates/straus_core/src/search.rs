//! Residual decomposition search
//!
//! Three tiers, cheapest first:
//!
//! 1. closed-form identity for primes the filter resolves,
//! 2. Type-1 parametric search over `x = ceil(p/4) + offset`, solving
//!    `4/p - 1/x = A/N` (A = 4x - p, N = p x) through the divisors of N^2,
//! 3. bounded brute force over `(a, b)`.
//!
//! A prime that survives every tier inside its budget is flagged, never
//! declared a counterexample.

use crate::decompose::{Decomposition, Method};
use crate::error::{Error, Result};
use crate::factor::{divisors_up_to, square_factors};
use crate::filter::{Class, ResidueFilter};
use crate::natural::Natural;
use crate::table::IdentityTable;
use crate::identity;
use num_integer::Roots;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Per-prime search budgets
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Number of Type-1 offsets tried (0 disables the tier)
    pub type1_depth: u64,
    /// Brute-force budget in units of floor(sqrt(p))
    pub brute_force_sqrt_factor: u64,
    /// Hard cap on brute-force iterations
    pub brute_force_max_iterations: u64,
    /// Wall-clock budget per prime across the search tiers
    pub time_budget: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            type1_depth: 50_000,
            brute_force_sqrt_factor: 64,
            brute_force_max_iterations: 100_000_000,
            time_budget: None,
        }
    }
}

impl SearchConfig {
    pub fn brute_force_budget(&self, p: u64) -> u64 {
        self.brute_force_sqrt_factor
            .saturating_mul(p.sqrt())
            .min(self.brute_force_max_iterations)
    }
}

/// Why a prime was left unresolved
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FlagReason {
    DepthExhausted,
    IterationBudget,
    TimeBudget,
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlagReason::DepthExhausted => "depth-exhausted",
            FlagReason::IterationBudget => "iteration-budget",
            FlagReason::TimeBudget => "time-budget",
        };
        f.write_str(s)
    }
}

/// A prime no tier resolved within budget
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FlaggedPrime {
    pub prime: u64,
    /// `prime mod M` for the filter's combined modulus
    pub residue: u64,
    pub reason: FlagReason,
    pub iterations: u64,
}

/// Outcome of searching one prime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Resolved(Decomposition),
    Flagged(FlaggedPrime),
}

/// Where a search currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Identity,
    Type1 { offset: u64 },
    BruteForce { a: u64 },
}

/// Progress of one prime's search. Owned by a single worker.
#[derive(Debug, Clone)]
pub struct SearchState {
    pub tier: Tier,
    pub iterations: u64,
    started: Instant,
}

impl SearchState {
    fn new() -> Self {
        Self {
            tier: Tier::Identity,
            iterations: 0,
            started: Instant::now(),
        }
    }

    fn out_of_time(&self, budget: Option<Duration>) -> bool {
        budget.is_some_and(|b| self.started.elapsed() >= b)
    }
}

enum Step {
    Found(Decomposition),
    Exhausted,
    Stopped(FlagReason),
}

/// Per-prime solver interface used by the dispatcher
///
/// Implementations must be deterministic: solving the same prime twice gives
/// the same verdict, so a re-run chunk reproduces its records exactly.
pub trait PrimeSolver: Send + Sync {
    /// Name of this solver (for logging)
    fn name(&self) -> &str;

    /// Resolve or flag one prime
    fn solve_prime(&self, p: u64) -> Result<Verdict>;

    /// Combined filter modulus, for reporting
    fn modulus(&self) -> u64 {
        1
    }
}

/// Read-only searcher shared by every worker
#[derive(Debug)]
pub struct Searcher {
    table: IdentityTable,
    filter: ResidueFilter,
    config: SearchConfig,
}

impl Searcher {
    /// `filter` must have been built from `table` (or from a table `table`
    /// extends); a prime the filter resolves must be resolved by `table`.
    pub fn new(table: IdentityTable, filter: ResidueFilter, config: SearchConfig) -> Self {
        Self {
            table,
            filter,
            config,
        }
    }

    pub fn table(&self) -> &IdentityTable {
        &self.table
    }

    pub fn filter(&self) -> &ResidueFilter {
        &self.filter
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Find a decomposition of 4/p, or flag p when the budgets run out.
    ///
    /// Errors are reserved for broken invariants: a closed form that does not
    /// verify, or a filter that disagrees with its table.
    pub fn solve(&self, p: u64) -> Result<Verdict> {
        if p < 2 {
            return Err(Error::InvalidRange { lo: p, hi: p + 1 });
        }
        let mut state = SearchState::new();

        if self.filter.classify(p) == Class::Resolved {
            let (id, witness) = self.table.lookup(p).ok_or_else(|| {
                Error::Arithmetic(format!(
                    "filter resolves {} but no identity of table {} does",
                    p,
                    self.table.name()
                ))
            })?;
            let triple = identity::evaluate(id.family, witness, p)?;
            return Decomposition::new(p, triple, Method::Identity).map(Verdict::Resolved);
        }

        match self.type1(p, &mut state)? {
            Step::Found(d) => return Ok(Verdict::Resolved(d)),
            Step::Stopped(reason) => return Ok(self.flag(p, reason, &state)),
            Step::Exhausted => {}
        }
        match self.brute_force(p, &mut state)? {
            Step::Found(d) => Ok(Verdict::Resolved(d)),
            Step::Stopped(reason) => Ok(self.flag(p, reason, &state)),
            Step::Exhausted => Ok(self.flag(p, FlagReason::DepthExhausted, &state)),
        }
    }

    fn flag(&self, p: u64, reason: FlagReason, state: &SearchState) -> Verdict {
        trace!(p, tier = ?state.tier, iterations = state.iterations, %reason, "budget exhausted");
        Verdict::Flagged(FlaggedPrime {
            prime: p,
            residue: p % self.filter.modulus(),
            reason,
            iterations: state.iterations,
        })
    }

    fn type1(&self, p: u64, state: &mut SearchState) -> Result<Step> {
        let x0 = p / 4 + u64::from(p % 4 != 0);
        let p128 = u128::from(p);

        for offset in 0..self.config.type1_depth {
            state.tier = Tier::Type1 { offset };
            if state.out_of_time(self.config.time_budget) {
                return Ok(Step::Stopped(FlagReason::TimeBudget));
            }
            state.iterations += 1;

            let Some(x) = x0.checked_add(offset) else {
                return Ok(Step::Exhausted);
            };
            let a_coef = 4 * u128::from(x) - p128;
            if a_coef == 0 {
                continue;
            }
            let n = p128 * u128::from(x);
            let residue = (a_coef - n % a_coef) % a_coef;

            let mut divisors = divisors_up_to(&square_factors(p, x), n);
            divisors.sort_unstable();
            for d in divisors {
                if d % a_coef != residue {
                    continue;
                }
                let nn = Natural::from(n);
                let Some(cofactor) = (&nn * &nn).div_exact(&Natural::from(d)) else {
                    continue;
                };
                let Some(z) = (&cofactor + &nn).div_exact(&Natural::from(a_coef)) else {
                    continue;
                };
                let y = Natural::from((d + n) / a_coef);
                let triple = [Natural::from(x), y, z];
                return Decomposition::new(p, triple, Method::Type1).map(Step::Found);
            }
        }
        Ok(Step::Exhausted)
    }

    fn brute_force(&self, p: u64, state: &mut SearchState) -> Result<Step> {
        let budget = self.config.brute_force_budget(p);
        if budget == 0 {
            return Ok(Step::Stopped(FlagReason::IterationBudget));
        }
        let spent_before = state.iterations;
        let p128 = u128::from(p);
        let a_lo = p / 4 + u64::from(p % 4 != 0);
        let a_hi = p / 4 * 3 + (p % 4) * 3 / 4;

        for a in a_lo..=a_hi {
            state.tier = Tier::BruteForce { a };
            let d = 4 * u128::from(a) - p128;
            if d == 0 {
                continue;
            }
            let pa = p128 * u128::from(a);
            let b_lo = u128::from(a).max(pa / d + 1);
            let b_hi = (pa / d)
                .saturating_mul(2)
                .saturating_add(2 * (pa % d) / d);

            let mut b = b_lo;
            loop {
                state.iterations += 1;
                if state.iterations - spent_before > budget {
                    return Ok(Step::Stopped(FlagReason::IterationBudget));
                }
                if state.iterations % 4096 == 0 && state.out_of_time(self.config.time_budget) {
                    return Ok(Step::Stopped(FlagReason::TimeBudget));
                }
                if b > b_hi {
                    break;
                }
                let Some(denom) = d.checked_mul(b).and_then(|db| db.checked_sub(pa)) else {
                    break;
                };
                if denom > 0 {
                    let num = &Natural::from(pa) * &Natural::from(b);
                    if let Some(c) = num.div_exact(&Natural::from(denom)) {
                        let triple = [Natural::from(a), Natural::from(b), c];
                        return Decomposition::new(p, triple, Method::BruteForce).map(Step::Found);
                    }
                }
                b += 1;
            }
        }
        Ok(Step::Exhausted)
    }
}

impl PrimeSolver for Searcher {
    fn name(&self) -> &str {
        self.table.name()
    }

    fn solve_prime(&self, p: u64) -> Result<Verdict> {
        self.solve(p)
    }

    fn modulus(&self) -> u64 {
        self.filter.modulus()
    }
}
