//! Record sinks
//!
//! The dispatcher hands every decomposition to a [`RecordSink`] in increasing
//! prime order, and every flagged prime as soon as its chunk completes.
//! `sync` makes the written records durable and returns a position in the
//! record stream that a checkpoint can store and a resumed run can truncate
//! back to.

use crate::decompose::Decomposition;
use crate::error::{Error, Result};
use crate::search::FlaggedPrime;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

pub trait RecordSink {
    /// Called in strictly increasing prime order.
    fn on_record(&mut self, record: &Decomposition) -> Result<()>;

    /// Called when a flagged prime is discovered, possibly out of order.
    fn on_flagged(&mut self, flagged: &FlaggedPrime) -> Result<()>;

    /// Flush everything written so far; returns the durable record position.
    fn sync(&mut self) -> Result<u64>;
}

/// Counts records and remembers flagged primes without keeping any files
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<Decomposition>,
    pub flagged: Vec<FlaggedPrime>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn on_record(&mut self, record: &Decomposition) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn on_flagged(&mut self, flagged: &FlaggedPrime) -> Result<()> {
        self.flagged.push(flagged.clone());
        Ok(())
    }

    fn sync(&mut self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}

/// JSON-lines files for records and flagged primes
pub struct JsonLinesSink {
    records: Option<BufWriter<File>>,
    flagged: Option<BufWriter<File>>,
    records_offset: u64,
    records_written: u64,
}

fn write_line<T: Serialize>(out: &mut BufWriter<File>, value: &T) -> Result<u64> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    out.write_all(&line)?;
    Ok(line.len() as u64)
}

impl JsonLinesSink {
    /// Open the output files for a fresh run or a resume.
    ///
    /// The record file is cut back to `records_offset` (0 for a fresh run) so
    /// records after the last checkpoint are not duplicated. The flagged file
    /// is rewritten from `checkpointed_flagged`, the flags the checkpoint
    /// already accounts for.
    ///
    /// A record file shorter than `records_offset` has lost checkpointed
    /// records and is rejected.
    pub fn open(
        records: Option<&Path>,
        flagged: Option<&Path>,
        records_offset: u64,
        checkpointed_flagged: &[FlaggedPrime],
    ) -> Result<Self> {
        let records = match records {
            Some(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(false)
                    .open(path)?;
                let len = file.metadata()?.len();
                if len < records_offset {
                    return Err(Error::CheckpointMismatch(format!(
                        "{} holds {} bytes but the checkpoint covers {}",
                        path.display(),
                        len,
                        records_offset
                    )));
                }
                file.set_len(records_offset)?;
                file.seek(SeekFrom::End(0))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let flagged = match flagged {
            Some(path) => {
                let mut out = BufWriter::new(File::create(path)?);
                for f in checkpointed_flagged {
                    write_line(&mut out, f)?;
                }
                out.flush()?;
                Some(out)
            }
            None => None,
        };

        Ok(Self {
            records,
            flagged,
            records_offset,
            records_written: 0,
        })
    }

    /// Number of records written by this sink since it was opened.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl RecordSink for JsonLinesSink {
    fn on_record(&mut self, record: &Decomposition) -> Result<()> {
        if let Some(out) = self.records.as_mut() {
            self.records_offset += write_line(out, record)?;
        }
        self.records_written += 1;
        Ok(())
    }

    fn on_flagged(&mut self, flagged: &FlaggedPrime) -> Result<()> {
        if let Some(out) = self.flagged.as_mut() {
            write_line(out, flagged)?;
            out.flush()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<u64> {
        if let Some(out) = self.records.as_mut() {
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        if let Some(out) = self.flagged.as_mut() {
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        Ok(self.records_offset)
    }
}
