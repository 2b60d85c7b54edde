//! Arguments and setup shared by the subcommands

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use straus_core::{FilterLimits, IdentityTable, ResidueFilter, SearchConfig, Searcher};

#[derive(Args, Debug, Clone)]
pub struct TableArgs {
    /// Identity table (JSON); the built-in Mordell table when omitted
    #[arg(long)]
    pub table: Option<PathBuf>,

    /// Largest combined modulus the filter may use
    #[arg(long, default_value_t = FilterLimits::default().max_modulus)]
    pub max_modulus: u64,
}

impl TableArgs {
    pub fn load(&self) -> Result<IdentityTable> {
        match &self.table {
            Some(path) => IdentityTable::load(path)
                .with_context(|| format!("failed to load identity table {}", path.display())),
            None => IdentityTable::mordell().context("built-in Mordell table is invalid"),
        }
    }

    pub fn limits(&self) -> FilterLimits {
        FilterLimits {
            max_modulus: self.max_modulus,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Type-1 offsets tried per hard prime
    #[arg(long, default_value_t = SearchConfig::default().type1_depth)]
    pub type1_depth: u64,

    /// Brute-force budget as a multiple of sqrt(p)
    #[arg(long, default_value_t = SearchConfig::default().brute_force_sqrt_factor)]
    pub brute_force_factor: u64,

    /// Hard cap on brute-force iterations per prime
    #[arg(long, default_value_t = SearchConfig::default().brute_force_max_iterations)]
    pub brute_force_max: u64,

    /// Wall-clock budget per prime in milliseconds
    #[arg(long)]
    pub prime_timeout_ms: Option<u64>,
}

impl SearchArgs {
    pub fn config(&self) -> SearchConfig {
        SearchConfig {
            type1_depth: self.type1_depth,
            brute_force_sqrt_factor: self.brute_force_factor,
            brute_force_max_iterations: self.brute_force_max,
            time_budget: self.prime_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Load the table, build its filter and wrap both in a searcher.
pub fn build_searcher(table: &TableArgs, search: &SearchArgs) -> Result<Searcher> {
    let identities = table.load()?;
    let filter = ResidueFilter::build(&identities, &table.limits())
        .with_context(|| format!("cannot build a filter for table {}", identities.name()))?;
    Ok(Searcher::new(identities, filter, search.config()))
}
