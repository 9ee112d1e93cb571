//! Core types for bookfeed-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One fetch-response unit of records
///
/// The payload is kept as the raw document the service returned; only the
/// record count, the first record's index and the transaction id are read out
/// of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Index of the first record, `None` when the batch holds no records
    pub first_index: Option<u64>,
    /// Number of records in the document
    pub record_count: usize,
    /// Server transaction to acknowledge once the batch is safely stored
    pub transaction_id: Option<String>,
    /// Full response document
    pub payload: Vec<u8>,
}

impl Batch {
    /// A batch with zero records marks the end of the data
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}

/// Identity of a batch committed to the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Position in the retrieval sequence, starting at 1
    pub sequence: u64,
    /// Index of the first record in the batch
    pub first_index: u64,
    /// Whether the server transaction for this batch was acknowledged
    pub confirmed: bool,
    /// File holding the batch
    pub path: PathBuf,
}

/// Phases of a retrieval run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Deriving the resume point from the store
    Init,
    /// Obtaining a session
    Authenticating,
    /// Requesting the next batch
    Fetching,
    /// Comparing the fetched batch with the last stored one
    DedupCheck,
    /// Committing the batch to the store
    Persisting,
    /// Honoring the minimum request interval
    Waiting,
    /// All expected records stored, or the service ran out of data
    Done,
    /// Stopped on an error
    Failed,
    /// Stopped on request
    Cancelled,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Authenticating => "authenticating",
            Phase::Fetching => "fetching",
            Phase::DedupCheck => "dedup_check",
            Phase::Persisting => "persisting",
            Phase::Waiting => "waiting",
            Phase::Done => "done",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Why a successful run stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The expected total number of records is stored
    Complete,
    /// The service returned a batch without records
    EndOfData,
    /// Cancellation was requested between two steps
    Cancelled,
}

impl Outcome {
    /// Terminal phase corresponding to this outcome
    pub fn phase(&self) -> Phase {
        match self {
            Outcome::Complete | Outcome::EndOfData => Phase::Done,
            Outcome::Cancelled => Phase::Cancelled,
        }
    }
}

/// Summary of one retrieval run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Why the run stopped
    pub outcome: Outcome,
    /// Batches in the store when the run started
    pub batches_at_start: usize,
    /// Batches in the store when the run ended
    pub batches_saved: usize,
    /// Batches persisted by this run
    pub batches_persisted: usize,
    /// Duplicate batches received and discarded by this run
    pub duplicates_discarded: usize,
    /// Fetch requests issued, retries included
    pub fetch_requests: u32,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: DateTime<Utc>,
}

/// Snapshot of how far the retrieval has come
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Records covered by stored batches
    pub records_saved: u64,
    /// Records expected in total
    pub total_records: u64,
    /// Records per batch
    pub batch_size: u32,
}

impl Progress {
    /// Derive progress from the store's batch count
    pub fn new(batches_saved: usize, batch_size: u32, total_records: u64) -> Self {
        Self {
            records_saved: batches_saved as u64 * u64::from(batch_size),
            total_records,
            batch_size,
        }
    }

    /// True once the stored batches cover the expected total
    pub fn is_complete(&self) -> bool {
        self.records_saved >= self.total_records
    }

    /// Records still expected
    pub fn remaining_records(&self) -> u64 {
        self.total_records.saturating_sub(self.records_saved)
    }

    /// Batches still expected, rounding up
    pub fn remaining_batches(&self) -> u64 {
        if self.batch_size == 0 {
            return 0;
        }
        self.remaining_records().div_ceil(u64::from(self.batch_size))
    }

    /// Estimated time to finish when one batch is fetched per `interval`
    pub fn estimated_remaining(&self, interval: Duration) -> Duration {
        let batches = u32::try_from(self.remaining_batches()).unwrap_or(u32::MAX);
        interval.saturating_mul(batches)
    }
}

/// Render a duration as "Hh Mm Ss" for log output
pub fn format_eta(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}h {minutes}m {seconds}s")
}
