//! Erdős–Straus verification engine
//!
//! Checks that `4/p = 1/a + 1/b + 1/c` has a solution in positive integers
//! for every prime `p` in a range, combining modular filtering, segmented
//! sieving, a tiered search and checkpointed multi-core orchestration.
//!
//! # Key Components
//!
//! - [`natural`] - Overflow-free naturals (u128 fast path, BigUint fallback)
//! - [`identity`] / [`table`] - Parametric identity families and tables
//! - [`filter`] - Hard residues modulo the combined identity modulus
//! - [`primes`] - Segmented sieve over `[lo, hi)`
//! - [`search`] - Identity, Type-1 and brute-force tiers with budgets
//! - [`dispatch`] - Worker pool with ordered output
//! - [`checkpoint`] - Atomic checkpoint/resume store

pub mod checkpoint;
pub mod crt;
pub mod decompose;
pub mod dispatch;
pub mod error;
pub mod factor;
pub mod filter;
pub mod identity;
pub mod natural;
pub mod output;
pub mod primes;
pub mod search;
pub mod table;

pub use checkpoint::{Checkpoint, CheckpointStore, RunStats};
pub use decompose::{Decomposition, Method};
pub use dispatch::{CancelToken, DispatchConfig, Dispatcher, RunSummary};
pub use error::{Error, Result};
pub use filter::{FilterLimits, FilterReport, ResidueFilter};
pub use identity::{Family, Identity, Witness};
pub use natural::Natural;
pub use output::{JsonLinesSink, MemorySink, RecordSink};
pub use primes::{SegmentedSieve, SmallPrimes};
pub use search::{FlagReason, FlaggedPrime, PrimeSolver, SearchConfig, Searcher, Verdict};
pub use table::{IdentityTable, TableSpec};
