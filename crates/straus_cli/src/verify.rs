//! `verify`: checkpointed range verification

use crate::common::{build_searcher, SearchArgs, TableArgs};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use straus_core::{
    CancelToken, CheckpointStore, DispatchConfig, Dispatcher, JsonLinesSink, RunSummary,
};
use tracing::info;

const STOP_FILE_POLL: Duration = Duration::from_millis(500);

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// First number of the range (inclusive)
    #[arg(long)]
    pub lo: u64,

    /// End of the range (exclusive)
    #[arg(long)]
    pub hi: u64,

    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub search: SearchArgs,

    /// Worker threads (default: available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Checkpoint file; an existing one is resumed
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Decomposition records as JSON lines
    #[arg(long)]
    pub records: Option<PathBuf>,

    /// Flagged primes as JSON lines
    #[arg(long)]
    pub flagged: Option<PathBuf>,

    /// Numbers per work chunk
    #[arg(long, default_value = "1000000")]
    pub chunk_len: u64,

    /// Checkpoint after this many primes
    #[arg(long, default_value = "1000000")]
    pub checkpoint_every: u64,

    /// Checkpoint after this many seconds
    #[arg(long, default_value = "60")]
    pub checkpoint_secs: u64,

    /// Stop gracefully once this file exists
    #[arg(long)]
    pub stop_file: Option<PathBuf>,

    /// Restart from --lo when the checkpoint was made with another table
    #[arg(long)]
    pub discard_stale_checkpoint: bool,
}

/// Map a finished run to the process exit code.
pub fn exit_code(summary: &RunSummary) -> u8 {
    if !summary.completed {
        2
    } else if !summary.flagged.is_empty() {
        1
    } else {
        0
    }
}

/// Cancels `token` when `path` appears. Stops polling once `done` is set.
fn watch_stop_file(path: PathBuf, token: CancelToken, done: Arc<AtomicBool>) {
    thread::spawn(move || {
        while !done.load(Ordering::Relaxed) && !token.is_cancelled() {
            if path.exists() {
                info!(path = %path.display(), "stop file found");
                token.cancel();
                break;
            }
            thread::sleep(STOP_FILE_POLL);
        }
    });
}

pub fn run(args: VerifyArgs) -> Result<ExitCode> {
    let searcher = build_searcher(&args.table, &args.search)?;

    let store = CheckpointStore::new(&args.checkpoint);
    let checkpoint = store
        .open_run(
            searcher.table().fingerprint(),
            args.lo,
            args.hi,
            args.discard_stale_checkpoint,
        )
        .with_context(|| format!("cannot use checkpoint {}", args.checkpoint.display()))?;

    let mut sink = JsonLinesSink::open(
        args.records.as_deref(),
        args.flagged.as_deref(),
        checkpoint.records_offset,
        &checkpoint.flagged,
    )
    .context("failed to open output files")?;

    let workers = args
        .workers
        .unwrap_or_else(|| DispatchConfig::default().workers);
    let config = DispatchConfig {
        chunk_len: args.chunk_len,
        checkpoint_every_primes: args.checkpoint_every,
        checkpoint_interval: Duration::from_secs(args.checkpoint_secs),
        ..DispatchConfig::with_workers(workers)
    };

    let cancel = CancelToken::new();
    let done = Arc::new(AtomicBool::new(false));
    if let Some(path) = &args.stop_file {
        watch_stop_file(path.clone(), cancel.clone(), done.clone());
    }

    let result = Dispatcher::new(&searcher, config).run(checkpoint, Some(&store), &mut sink, &cancel);
    done.store(true, Ordering::Relaxed);
    let summary = result.context("verification run failed")?;

    print_summary(&summary, searcher.table().name());
    Ok(ExitCode::from(exit_code(&summary)))
}

fn print_summary(s: &RunSummary, table: &str) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              Erdős–Straus Range Verification                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌────────────────────────┬─────────────────────────────────────┐");
    println!("│ Table                  │ {:>35} │", table);
    println!("│ Range                  │ {:>35} │", format!("[{}, {})", s.lo, s.hi));
    println!("│ Verified up to         │ {:>35} │", s.boundary);
    println!("├────────────────────────┼─────────────────────────────────────┤");
    println!("│ Primes                 │ {:>35} │", s.stats.primes);
    println!("│   by identity          │ {:>35} │", s.stats.identity);
    println!("│   by Type-1 search     │ {:>35} │", s.stats.type1);
    println!("│   by brute force       │ {:>35} │", s.stats.brute_force);
    println!("│   flagged              │ {:>35} │", s.flagged.len());
    println!("├────────────────────────┼─────────────────────────────────────┤");
    println!("│ Chunk retries          │ {:>35} │", s.stats.chunk_retries);
    println!("│ Checkpoints written    │ {:>35} │", s.checkpoints_written);
    println!("│ Checkpoint failures    │ {:>35} │", s.checkpoint_failures);
    println!("│ Elapsed (s)            │ {:>35.2} │", s.elapsed.as_secs_f64());
    println!("│ Primes/sec             │ {:>35.0} │", s.primes_per_sec());
    println!("└────────────────────────┴─────────────────────────────────────┘");
    println!();

    if s.no_counterexample() {
        println!("✓ no counterexample found in [{}, {})", s.lo, s.hi);
        return;
    }
    if !s.completed {
        println!(
            "⚠ interrupted at {}; rerun with the same checkpoint to continue",
            s.boundary
        );
    }
    if !s.flagged.is_empty() {
        println!("⚠ {} prime(s) flagged for further study:", s.flagged.len());
        for f in &s.flagged {
            println!(
                "    {:>20}  residue {:>10}  {:<16}  {} iterations",
                f.prime,
                f.residue,
                f.reason.to_string(),
                f.iterations
            );
        }
    }
}
