//! Checkpoint/resume store
//!
//! A checkpoint records the highest boundary below which every prime has been
//! searched and written to the record sink, together with the flagged primes
//! and counters for that prefix. It is written atomically (temp file, fsync,
//! rename) so a crash leaves either the old or the new state on disk.

use crate::decompose::Method;
use crate::error::{Error, Result};
use crate::search::{FlaggedPrime, Verdict};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const FORMAT_VERSION: u32 = 1;

/// Counters over the verified prefix of a run
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub primes: u64,
    pub identity: u64,
    pub type1: u64,
    pub brute_force: u64,
    pub flagged: u64,
    pub chunks: u64,
    pub chunk_retries: u64,
}

impl RunStats {
    pub fn record(&mut self, verdict: &Verdict) {
        self.primes += 1;
        match verdict {
            Verdict::Resolved(d) => match d.method {
                Method::Identity => self.identity += 1,
                Method::Type1 => self.type1 += 1,
                Method::BruteForce => self.brute_force += 1,
            },
            Verdict::Flagged(_) => self.flagged += 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub format_version: u32,
    pub table_fingerprint: String,
    pub lo: u64,
    pub hi: u64,
    /// Every prime in `[lo, boundary)` is done
    pub boundary: u64,
    pub flagged: Vec<FlaggedPrime>,
    pub stats: RunStats,
    /// Durable position of the record stream at `boundary`
    pub records_offset: u64,
}

impl Checkpoint {
    pub fn fresh(table_fingerprint: &str, lo: u64, hi: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            table_fingerprint: table_fingerprint.to_string(),
            lo,
            hi,
            boundary: lo,
            flagged: Vec::new(),
            stats: RunStats::default(),
            records_offset: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.boundary >= self.hi
    }

    /// Check that this checkpoint can continue a run over `[lo, hi)` with
    /// the table `fingerprint`. The end of the range may move, the start may not.
    pub fn validate_for(&self, fingerprint: &str, lo: u64, hi: u64) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::CheckpointMismatch(format!(
                "format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if self.table_fingerprint != fingerprint {
            return Err(Error::StaleCheckpoint {
                expected: fingerprint.to_string(),
                found: self.table_fingerprint.clone(),
            });
        }
        if self.lo != lo {
            return Err(Error::CheckpointMismatch(format!(
                "checkpoint starts at {}, run starts at {}",
                self.lo, lo
            )));
        }
        if self.boundary < self.lo || hi < self.boundary {
            return Err(Error::CheckpointMismatch(format!(
                "boundary {} outside [{}, {}]",
                self.boundary, lo, hi
            )));
        }
        Ok(())
    }
}

/// Single-writer checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// The stored checkpoint, if any.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the checkpoint for a run over `[lo, hi)`, or start fresh.
    ///
    /// A checkpoint from a different identity table is an error unless
    /// `discard_stale` is set, in which case the run restarts from `lo`.
    pub fn open_run(
        &self,
        fingerprint: &str,
        lo: u64,
        hi: u64,
        discard_stale: bool,
    ) -> Result<Checkpoint> {
        if lo > hi {
            return Err(Error::InvalidRange { lo, hi });
        }
        let Some(mut cp) = self.load()? else {
            return Ok(Checkpoint::fresh(fingerprint, lo, hi));
        };
        match cp.validate_for(fingerprint, lo, hi) {
            Ok(()) => {
                cp.hi = hi;
                info!(
                    path = %self.path.display(),
                    boundary = cp.boundary,
                    flagged = cp.flagged.len(),
                    "resuming from checkpoint"
                );
                Ok(cp)
            }
            Err(Error::StaleCheckpoint { found, .. }) if discard_stale => {
                warn!(
                    path = %self.path.display(),
                    table = %found,
                    "discarding checkpoint from a different identity table"
                );
                Ok(Checkpoint::fresh(fingerprint, lo, hi))
            }
            Err(e) => Err(e),
        }
    }

    /// Atomically replace the stored checkpoint.
    pub fn save(&self, cp: &Checkpoint) -> Result<()> {
        let tmp = self.temp_path();
        let bytes = serde_json::to_vec_pretty(cp)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
