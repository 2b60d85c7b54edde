//! `solve`: decompose individual primes

use crate::common::{build_searcher, SearchArgs, TableArgs};
use anyhow::{bail, Result};
use clap::Args;
use std::process::ExitCode;
use straus_core::primes::is_prime_u64;
use straus_core::{Searcher, Verdict};

#[derive(Args, Debug)]
pub struct SolveArgs {
    /// Primes to decompose
    #[arg(required = true)]
    pub primes: Vec<u64>,

    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub search: SearchArgs,

    /// Print each verdict as a JSON line
    #[arg(long)]
    pub json: bool,
}

/// Solve each prime in order; composites are rejected up front.
pub fn solve_all(searcher: &Searcher, primes: &[u64]) -> Result<Vec<Verdict>> {
    if let Some(&n) = primes.iter().find(|&&n| !is_prime_u64(n)) {
        bail!("{} is not prime", n);
    }
    primes
        .iter()
        .map(|&p| searcher.solve(p).map_err(anyhow::Error::from))
        .collect()
}

pub fn run(args: SolveArgs) -> Result<ExitCode> {
    let searcher = build_searcher(&args.table, &args.search)?;
    let verdicts = solve_all(&searcher, &args.primes)?;

    let mut flagged = 0;
    for verdict in &verdicts {
        match verdict {
            Verdict::Resolved(d) if args.json => println!("{}", serde_json::to_string(d)?),
            Verdict::Flagged(f) if args.json => println!("{}", serde_json::to_string(f)?),
            Verdict::Resolved(d) => println!("✓ {}  [{}]", d, d.method),
            Verdict::Flagged(f) => println!(
                "⚠ {}: flagged ({}, residue {} after {} iterations)",
                f.prime, f.reason, f.residue, f.iterations
            ),
        }
        if matches!(verdict, Verdict::Flagged(_)) {
            flagged += 1;
        }
    }
    Ok(if flagged == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use straus_core::Method;

    fn searcher() -> Searcher {
        let table = TableArgs {
            table: None,
            max_modulus: 1 << 28,
        };
        let search = SearchArgs {
            type1_depth: 64,
            brute_force_factor: 64,
            brute_force_max: 100_000_000,
            prime_timeout_ms: None,
        };
        build_searcher(&table, &search).unwrap()
    }

    #[test]
    fn test_solve_mixed_methods() {
        let verdicts = solve_all(&searcher(), &[5, 1009, 1129]).unwrap();
        let methods: Vec<Method> = verdicts
            .iter()
            .map(|v| match v {
                Verdict::Resolved(d) => d.method,
                Verdict::Flagged(f) => panic!("{} flagged", f.prime),
            })
            .collect();
        assert_eq!(methods, vec![Method::Identity, Method::Type1, Method::Type1]);
    }

    #[test]
    fn test_composite_rejected() {
        let err = solve_all(&searcher(), &[7, 1001]).unwrap_err();
        assert!(err.to_string().contains("1001"));
    }
}
