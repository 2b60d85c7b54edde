//! Parallel work dispatcher
//!
//! Splits `[boundary, hi)` into fixed-length chunks that worker threads pull
//! from a shared queue. Completed chunks come back over a channel and are
//! flushed to the record sink strictly in chunk order, so the output is the
//! same for any number of workers.
//!
//! ```text
//! workers:     [c0] [c2] [c1] [c4] [c3] ...     (completion order)
//! reorder:      c0 | c2 (held) | c1 -> c1, c2 | c4 (held) | c3 -> c3, c4
//! sink:         c0   c1   c2   c3   c4          (chunk order)
//! ```
//!
//! The queue never hands out a chunk more than `max_in_flight` ahead of the
//! last flushed one, which bounds the reorder buffer.

use crate::checkpoint::{Checkpoint, CheckpointStore, RunStats};
use crate::error::{Error, Result};
use crate::output::RecordSink;
use crate::primes::{SegmentedSieve, SmallPrimes, DEFAULT_WINDOW};
use crate::search::{FlaggedPrime, PrimeSolver, Verdict};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Numbers (not primes) per chunk
    pub chunk_len: u64,
    /// Sieve window inside a chunk
    pub sieve_window: u64,
    /// Chunks allowed ahead of the last flushed chunk
    pub max_in_flight: usize,
    /// Checkpoint after this many flushed primes
    pub checkpoint_every_primes: u64,
    /// ... or after this much time, whichever comes first
    pub checkpoint_interval: Duration,
    /// Re-runs of a panicking chunk before the run fails
    pub max_chunk_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism().map_or(1, |n| n.get());
        Self::with_workers(workers)
    }
}

impl DispatchConfig {
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            chunk_len: 1_000_000,
            sieve_window: DEFAULT_WINDOW,
            max_in_flight: 2 * workers,
            checkpoint_every_primes: 1_000_000,
            checkpoint_interval: Duration::from_secs(60),
            max_chunk_retries: 2,
        }
    }
}

/// Cooperative cancellation shared between the caller and a run
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop handing out chunks; in-flight chunks still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub lo: u64,
    pub hi: u64,
    /// Every prime in `[lo, boundary)` was searched
    pub boundary: u64,
    pub completed: bool,
    pub stats: RunStats,
    /// Primes searched by this run, excluding a resumed prefix
    pub searched: u64,
    pub flagged: Vec<FlaggedPrime>,
    pub checkpoints_written: u64,
    pub checkpoint_failures: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when the whole range was covered and nothing was flagged.
    pub fn no_counterexample(&self) -> bool {
        self.completed && self.flagged.is_empty()
    }

    /// Primes searched by this run per second of wall time.
    pub fn primes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.searched as f64 / secs
        } else {
            0.0
        }
    }
}

/// Share of `[lo, hi)` below `boundary`, in percent.
fn percent_covered(lo: u64, hi: u64, boundary: u64) -> f64 {
    if hi <= lo {
        return 100.0;
    }
    100.0 * boundary.saturating_sub(lo) as f64 / (hi - lo) as f64
}

#[derive(Debug, Clone, Copy)]
struct Chunk {
    index: u64,
    start: u64,
    end: u64,
    attempt: u32,
}

struct ChunkOutcome {
    chunk: Chunk,
    verdicts: Vec<Verdict>,
}

enum Message {
    Done(ChunkOutcome),
    Retrying(Chunk),
    Failed(Chunk),
    Fatal(Chunk, Error),
}

struct QueueState {
    next_index: u64,
    next_start: u64,
    retry: VecDeque<Chunk>,
    flushed: u64,
    closed: bool,
}

/// Chunk source shared by the workers
struct WorkQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
    hi: u64,
    chunk_len: u64,
    max_in_flight: u64,
}

impl WorkQueue {
    fn new(start: u64, hi: u64, chunk_len: u64, max_in_flight: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_index: 0,
                next_start: start,
                retry: VecDeque::new(),
                flushed: 0,
                closed: false,
            }),
            changed: Condvar::new(),
            hi,
            chunk_len: chunk_len.max(1),
            max_in_flight: max_in_flight.max(1) as u64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // a worker panic is caught before it can poison the lock
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next chunk to process, blocking while the in-flight window is full.
    fn next(&self) -> Option<Chunk> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(chunk) = state.retry.pop_front() {
                return Some(chunk);
            }
            if state.next_start >= self.hi {
                return None;
            }
            if state.next_index < state.flushed + self.max_in_flight {
                let start = state.next_start;
                let end = start.saturating_add(self.chunk_len).min(self.hi);
                let chunk = Chunk {
                    index: state.next_index,
                    start,
                    end,
                    attempt: 0,
                };
                state.next_index += 1;
                state.next_start = end;
                return Some(chunk);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn requeue(&self, chunk: Chunk) {
        self.lock().retry.push_back(chunk);
        self.changed.notify_all();
    }

    fn mark_flushed(&self, next_index: u64) {
        self.lock().flushed = next_index;
        self.changed.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }
}

fn process_chunk<S: PrimeSolver>(
    solver: &S,
    small: &SmallPrimes,
    window: u64,
    chunk: Chunk,
) -> Result<ChunkOutcome> {
    let sieve = SegmentedSieve::new(small, window);
    let mut verdicts = Vec::new();
    for primes in sieve.windows(chunk.start, chunk.end)? {
        for p in primes {
            verdicts.push(solver.solve_prime(p)?);
        }
    }
    Ok(ChunkOutcome { chunk, verdicts })
}

fn worker_loop<S: PrimeSolver>(
    solver: &S,
    small: &SmallPrimes,
    queue: &WorkQueue,
    config: &DispatchConfig,
    tx: Sender<Message>,
) {
    while let Some(chunk) = queue.next() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            process_chunk(solver, small, config.sieve_window, chunk)
        }));
        let message = match result {
            Ok(Ok(outcome)) => Message::Done(outcome),
            Ok(Err(e)) => Message::Fatal(chunk, e),
            Err(_) if chunk.attempt < config.max_chunk_retries => {
                queue.requeue(Chunk {
                    attempt: chunk.attempt + 1,
                    ..chunk
                });
                Message::Retrying(chunk)
            }
            Err(_) => Message::Failed(chunk),
        };
        if tx.send(message).is_err() {
            break;
        }
    }
}

/// Runs a checkpointed verification over a range
pub struct Dispatcher<'a, S: PrimeSolver> {
    solver: &'a S,
    config: DispatchConfig,
}

/// Dispatcher-side bookkeeping: ordered flushing and checkpoint cadence
struct Flusher<'st, 'sk> {
    checkpoint: Checkpoint,
    store: Option<&'st CheckpointStore>,
    sink: &'sk mut dyn RecordSink,
    pending: BTreeMap<u64, ChunkOutcome>,
    next_index: u64,
    primes_since_checkpoint: u64,
    last_checkpoint: Instant,
    written: u64,
    failures: u64,
}

impl Flusher<'_, '_> {
    /// Flush every buffered chunk that is next in order.
    fn flush_ready(&mut self) -> Result<()> {
        while let Some(outcome) = self.pending.remove(&self.next_index) {
            for verdict in &outcome.verdicts {
                match verdict {
                    Verdict::Resolved(d) => self.sink.on_record(d)?,
                    Verdict::Flagged(f) => self.checkpoint.flagged.push(f.clone()),
                }
                self.checkpoint.stats.record(verdict);
            }
            self.checkpoint.stats.chunks += 1;
            self.checkpoint.boundary = outcome.chunk.end;
            self.primes_since_checkpoint += outcome.verdicts.len() as u64;
            self.next_index += 1;
            debug!(
                chunk = outcome.chunk.index,
                start = outcome.chunk.start,
                end = outcome.chunk.end,
                primes = outcome.verdicts.len(),
                "flushed chunk"
            );
        }
        Ok(())
    }

    fn checkpoint_due(&self, config: &DispatchConfig) -> bool {
        self.primes_since_checkpoint > 0
            && (self.primes_since_checkpoint >= config.checkpoint_every_primes
                || self.last_checkpoint.elapsed() >= config.checkpoint_interval)
    }

    /// Sync the sink and persist the current state. Store failures are
    /// survivable; sink failures are not, since records would be lost.
    fn write_checkpoint(&mut self) -> Result<()> {
        self.checkpoint.records_offset = self.sink.sync()?;
        self.primes_since_checkpoint = 0;
        self.last_checkpoint = Instant::now();
        let Some(store) = self.store else {
            return Ok(());
        };
        match store.save(&self.checkpoint) {
            Ok(()) => {
                self.written += 1;
                let cp = &self.checkpoint;
                info!(
                    boundary = cp.boundary,
                    percent = %format!("{:.2}", percent_covered(cp.lo, cp.hi, cp.boundary)),
                    primes = cp.stats.primes,
                    flagged = cp.flagged.len(),
                    "checkpoint written"
                );
            }
            Err(e) => {
                self.failures += 1;
                warn!(path = %store.path().display(), error = %e, "checkpoint write failed");
            }
        }
        Ok(())
    }
}

impl<'a, S: PrimeSolver> Dispatcher<'a, S> {
    pub fn new(solver: &'a S, config: DispatchConfig) -> Self {
        Self { solver, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Verify every prime in `[checkpoint.boundary, checkpoint.hi)`.
    ///
    /// The checkpoint must already be validated against the solver's table;
    /// the sink must already be positioned at `checkpoint.records_offset`.
    pub fn run(
        &self,
        checkpoint: Checkpoint,
        store: Option<&CheckpointStore>,
        sink: &mut dyn RecordSink,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let (lo, hi, start) = (checkpoint.lo, checkpoint.hi, checkpoint.boundary);
        let primes_before = checkpoint.stats.primes;
        if start > hi {
            return Err(Error::InvalidRange { lo: start, hi });
        }

        let small = SmallPrimes::for_range_end(hi);
        info!(
            lo,
            hi,
            resume_from = start,
            solver = self.solver.name(),
            modulus = self.solver.modulus(),
            workers = self.config.workers,
            chunk_len = self.config.chunk_len,
            base_primes = small.len(),
            "starting verification run"
        );

        let queue = WorkQueue::new(start, hi, self.config.chunk_len, self.config.max_in_flight);
        let mut flusher = Flusher {
            checkpoint,
            store,
            sink,
            pending: BTreeMap::new(),
            next_index: 0,
            primes_since_checkpoint: 0,
            last_checkpoint: Instant::now(),
            written: 0,
            failures: 0,
        };

        let failure = thread::scope(|scope| {
            let (tx, rx) = channel();
            for _ in 0..self.config.workers.max(1) {
                let tx = tx.clone();
                let (solver, small, queue, config) = (self.solver, &small, &queue, &self.config);
                scope.spawn(move || worker_loop(solver, small, queue, config, tx));
            }
            drop(tx);

            let mut failure: Option<Error> = None;
            let mut cancelled = false;
            loop {
                if !cancelled && cancel.is_cancelled() {
                    cancelled = true;
                    info!("cancellation requested; finishing in-flight chunks");
                    queue.close();
                }
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(Message::Done(outcome)) => {
                        if failure.is_some() {
                            continue;
                        }
                        for v in &outcome.verdicts {
                            if let Verdict::Flagged(f) = v {
                                warn!(
                                    prime = f.prime,
                                    residue = f.residue,
                                    reason = %f.reason,
                                    iterations = f.iterations,
                                    "prime flagged"
                                );
                                if let Err(e) = flusher.sink.on_flagged(f) {
                                    failure = Some(e);
                                }
                            }
                        }
                        flusher.pending.insert(outcome.chunk.index, outcome);
                        let flushed = flusher.flush_ready().and_then(|()| {
                            if flusher.checkpoint_due(&self.config) {
                                flusher.write_checkpoint()
                            } else {
                                Ok(())
                            }
                        });
                        if let Err(e) = flushed {
                            failure.get_or_insert(e);
                        }
                        queue.mark_flushed(flusher.next_index);
                    }
                    Ok(Message::Retrying(chunk)) => {
                        flusher.checkpoint.stats.chunk_retries += 1;
                        warn!(
                            chunk = chunk.index,
                            start = chunk.start,
                            end = chunk.end,
                            attempt = chunk.attempt + 1,
                            "worker panicked; retrying chunk"
                        );
                    }
                    Ok(Message::Failed(chunk)) => {
                        error!(chunk = chunk.index, start = chunk.start, end = chunk.end, "chunk failed");
                        failure.get_or_insert(Error::WorkerFailed {
                            start: chunk.start,
                            end: chunk.end,
                            attempts: chunk.attempt + 1,
                        });
                    }
                    Ok(Message::Fatal(chunk, e)) => {
                        error!(chunk = chunk.index, start = chunk.start, error = %e, "fatal error");
                        failure.get_or_insert(e);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if failure.is_none() && flusher.checkpoint_due(&self.config) {
                            if let Err(e) = flusher.write_checkpoint() {
                                failure = Some(e);
                            }
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if failure.is_some() {
                    queue.close();
                }
            }
            failure
        });

        // everything flushed so far is valid, even after a failure
        if let Err(e) = flusher.write_checkpoint() {
            error!(error = %e, "final sync failed");
            return Err(failure.unwrap_or(e));
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let checkpoint = flusher.checkpoint;
        let summary = RunSummary {
            lo,
            hi,
            boundary: checkpoint.boundary,
            completed: checkpoint.is_complete(),
            searched: checkpoint.stats.primes - primes_before,
            stats: checkpoint.stats,
            flagged: checkpoint.flagged,
            checkpoints_written: flusher.written,
            checkpoint_failures: flusher.failures,
            elapsed: started.elapsed(),
        };
        info!(
            boundary = summary.boundary,
            completed = summary.completed,
            primes = summary.stats.primes,
            flagged = summary.flagged.len(),
            secs = summary.elapsed.as_secs_f64(),
            primes_per_sec = summary.primes_per_sec(),
            "verification run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::{Decomposition, Method};
    use crate::natural::Natural;
    use crate::output::MemorySink;
    use crate::search::{FlagReason, FlaggedPrime};
    use std::sync::atomic::AtomicU32;

    /// Resolves 2 and flags every other prime. Panics on `panic_on` a fixed
    /// number of times before answering.
    struct Toy {
        panics_left: AtomicU32,
        panic_on: u64,
    }

    impl Toy {
        fn new(panic_on: u64, panics: u32) -> Self {
            Self {
                panics_left: AtomicU32::new(panics),
                panic_on,
            }
        }
    }

    impl PrimeSolver for Toy {
        fn name(&self) -> &str {
            "toy"
        }

        fn solve_prime(&self, p: u64) -> Result<Verdict> {
            if p == self.panic_on
                && self
                    .panics_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                panic!("injected failure at {}", p);
            }
            if p == 2 {
                let t = [Natural::one(), Natural::from(2u64), Natural::from(2u64)];
                return Decomposition::new(2, t, Method::Identity).map(Verdict::Resolved);
            }
            Ok(Verdict::Flagged(FlaggedPrime {
                prime: p,
                residue: p,
                reason: FlagReason::DepthExhausted,
                iterations: 0,
            }))
        }
    }

    fn config(workers: usize) -> DispatchConfig {
        DispatchConfig {
            chunk_len: 10,
            sieve_window: 4,
            ..DispatchConfig::with_workers(workers)
        }
    }

    #[test]
    fn test_ordered_output_any_worker_count() {
        let solver = Toy::new(0, 0);
        let mut reference = None;
        for workers in [1, 3, 8] {
            let mut sink = MemorySink::new();
            let summary = Dispatcher::new(&solver, config(workers))
                .run(Checkpoint::fresh("t", 0, 500), None, &mut sink, &CancelToken::new())
                .unwrap();
            assert!(summary.completed);
            assert_eq!(summary.stats.primes, 95);
            assert_eq!(summary.stats.chunks, 50);
            let flagged: Vec<u64> = summary.flagged.iter().map(|f| f.prime).collect();
            let mut sorted = flagged.clone();
            sorted.sort_unstable();
            assert_eq!(flagged, sorted);
            match &reference {
                None => reference = Some(flagged),
                Some(r) => assert_eq!(r, &flagged),
            }
        }
    }

    #[test]
    fn test_panicking_chunk_is_retried() {
        let solver = Toy::new(97, 2);
        let mut sink = MemorySink::new();
        let summary = Dispatcher::new(&solver, config(2))
            .run(Checkpoint::fresh("t", 0, 200), None, &mut sink, &CancelToken::new())
            .unwrap();
        assert!(summary.completed);
        assert_eq!(summary.stats.chunk_retries, 2);
        assert_eq!(summary.stats.primes, 46);
    }

    #[test]
    fn test_persistent_panic_fails_run() {
        let solver = Toy::new(97, u32::MAX);
        let mut sink = MemorySink::new();
        let err = Dispatcher::new(&solver, config(2))
            .run(Checkpoint::fresh("t", 0, 200), None, &mut sink, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::WorkerFailed { start: 90, end: 100, attempts: 3 }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let solver = Toy::new(0, 0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut sink = MemorySink::new();
        let summary = Dispatcher::new(&solver, config(2))
            .run(Checkpoint::fresh("t", 0, 1_000), None, &mut sink, &cancel)
            .unwrap();
        assert!(!summary.completed);
        // at most the in-flight window was handed out before the queue closed
        assert!(summary.boundary <= 40, "boundary {}", summary.boundary);

        // flushed chunks form a prefix of [0, 1000)
        assert_eq!(summary.boundary, summary.stats.chunks * 10);
        let primes = SegmentedSieve::new(&SmallPrimes::up_to(100), 16)
            .primes(0, summary.boundary)
            .unwrap();
        assert_eq!(summary.stats.primes, primes.len() as u64);
        let mut seen: Vec<u64> = sink.records.iter().map(|d| d.prime).collect();
        seen.extend(summary.flagged.iter().map(|f| f.prime));
        seen.sort_unstable();
        assert_eq!(seen, primes);
    }

    #[test]
    fn test_checkpoint_failures_are_survivable() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing").join("run.ckpt"));
        let solver = Toy::new(0, 0);
        let mut sink = MemorySink::new();
        let config = DispatchConfig {
            checkpoint_every_primes: 5,
            ..config(2)
        };
        let summary = Dispatcher::new(&solver, config)
            .run(Checkpoint::fresh("t", 0, 500), Some(&store), &mut sink, &CancelToken::new())
            .unwrap();
        assert!(summary.completed);
        assert_eq!(summary.stats.primes, 95);
        assert_eq!(summary.checkpoints_written, 0);
        assert!(summary.checkpoint_failures > 1);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_resumed_run_counts_only_new_primes() {
        let solver = Toy::new(0, 0);
        let mut first = MemorySink::new();
        let mut cp = Checkpoint::fresh("t", 0, 500);
        let head = Dispatcher::new(&solver, config(2))
            .run(Checkpoint::fresh("t", 0, 100), None, &mut first, &CancelToken::new())
            .unwrap();
        cp.boundary = head.boundary;
        cp.stats = head.stats.clone();
        cp.flagged = head.flagged.clone();

        let mut sink = MemorySink::new();
        let summary = Dispatcher::new(&solver, config(2))
            .run(cp, None, &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(head.searched, 25);
        assert_eq!(summary.stats.primes, 95);
        assert_eq!(summary.searched, 70);
        assert!(summary.primes_per_sec() >= 0.0);
    }

    #[test]
    fn test_percent_covered() {
        assert_eq!(percent_covered(0, 200, 50), 25.0);
        assert_eq!(percent_covered(100, 200, 200), 100.0);
        assert_eq!(percent_covered(7, 7, 7), 100.0);
    }

    #[test]
    fn test_empty_range() {
        let solver = Toy::new(0, 0);
        let mut sink = MemorySink::new();
        let summary = Dispatcher::new(&solver, config(2))
            .run(Checkpoint::fresh("t", 50, 50), None, &mut sink, &CancelToken::new())
            .unwrap();
        assert!(summary.completed);
        assert!(summary.no_counterexample());
        assert_eq!(summary.stats.primes, 0);
    }
}
