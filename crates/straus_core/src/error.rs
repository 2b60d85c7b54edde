//! Error types for the verification engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed identity table (entry {entry}): {reason}")]
    Table { entry: usize, reason: String },

    #[error("combined modulus exceeds the limit of {limit}")]
    ModulusTooLarge { limit: u64 },

    #[error("arithmetic invariant violated: {0}")]
    Arithmetic(String),

    #[error("invalid range [{lo}, {hi})")]
    InvalidRange { lo: u64, hi: u64 },

    #[error("checkpoint was written for identity table {found}, current table is {expected}")]
    StaleCheckpoint { expected: String, found: String },

    #[error("checkpoint does not match this run: {0}")]
    CheckpointMismatch(String),

    #[error("worker failed on chunk [{start}, {end}) after {attempts} attempts")]
    WorkerFailed { start: u64, end: u64, attempts: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn table(entry: usize, reason: impl Into<String>) -> Self {
        Error::Table {
            entry,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
