//! Durable, append-only batch store
//!
//! Each batch lives in its own file named `batch_{sequence:04}_{first_index}.xml`,
//! with a `_confirmed` marker appended to the stem once the server transaction
//! has been acknowledged. The directory listing is the single source of truth:
//! the batch count, the resume offset and the last first index are all derived
//! from it whenever the store is opened or refreshed.
//!
//! Batches are written to a hidden `.partial` file, flushed to disk and then
//! renamed into place, so a crash at any point leaves either the complete
//! batch or nothing visible. Leftover partial files are removed on open.

use crate::document::DocumentParser;
use crate::error::{Result, StoreError};
use crate::types::{Batch, BatchSummary};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const BATCH_PREFIX: &str = "batch_";
const BATCH_EXTENSION: &str = ".xml";
const CONFIRMED_MARKER: &str = "confirmed";
const PARTIAL_SUFFIX: &str = ".partial";

/// A batch file found in the store directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBatch {
    /// Position in the retrieval sequence, starting at 1
    pub sequence: u64,
    /// First record index, `None` if the filename does not carry it
    pub first_index: Option<u64>,
    /// Whether the filename carries the confirmation marker
    pub confirmed: bool,
    /// Full path of the batch file
    pub path: PathBuf,
}

impl StoredBatch {
    fn summary(&self) -> Option<BatchSummary> {
        Some(BatchSummary {
            sequence: self.sequence,
            first_index: self.first_index?,
            confirmed: self.confirmed,
            path: self.path.clone(),
        })
    }
}

/// Components encoded in a batch filename
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BatchName {
    sequence: u64,
    first_index: Option<u64>,
    confirmed: bool,
}

/// Build the filename for a batch
pub fn batch_file_name(sequence: u64, first_index: u64, confirmed: bool) -> String {
    if confirmed {
        format!("{BATCH_PREFIX}{sequence:04}_{first_index}_{CONFIRMED_MARKER}{BATCH_EXTENSION}")
    } else {
        format!("{BATCH_PREFIX}{sequence:04}_{first_index}{BATCH_EXTENSION}")
    }
}

/// Parse a batch filename; anything that is not a batch file yields `None`
fn parse_batch_file_name(name: &str) -> Option<BatchName> {
    let stem = name.strip_prefix(BATCH_PREFIX)?.strip_suffix(BATCH_EXTENSION)?;
    let mut parts = stem.split('_');

    let sequence_part = parts.next()?;
    if sequence_part.is_empty() || !sequence_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sequence = sequence_part.parse().ok()?;

    let mut first_index = None;
    let mut confirmed = false;
    for part in parts {
        if part == CONFIRMED_MARKER && !confirmed {
            confirmed = true;
        } else if first_index.is_none() && !confirmed && !part.is_empty() {
            first_index = Some(part.parse().ok()?);
        } else {
            return None;
        }
    }

    Some(BatchName {
        sequence,
        first_index,
        confirmed,
    })
}

/// The store of previously retrieved batches
#[derive(Debug)]
pub struct BatchStore {
    dir: PathBuf,
    parser: DocumentParser,
    entries: Vec<StoredBatch>,
}

impl BatchStore {
    /// Open (creating if needed) the store at `dir` and derive its state
    ///
    /// # Errors
    /// Fails when the directory cannot be created or listed, or when the files
    /// in it violate the store invariants (sequence gap, repeated first index,
    /// unreadable most recent batch).
    pub async fn open(dir: impl Into<PathBuf>, parser: DocumentParser) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Read {
                path: dir.clone(),
                source,
            })?;

        let mut store = Self {
            dir,
            parser,
            entries: Vec::new(),
        };
        store.refresh().await?;
        Ok(store)
    }

    /// Directory this store writes to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-derive all state from the directory listing
    ///
    /// Only the most recent batch is ever opened, and only when its filename
    /// does not carry the first index.
    pub async fn refresh(&mut self) -> Result<()> {
        let mut entries = self.scan().await?;
        entries.sort_by_key(|e| e.sequence);

        for (position, entry) in entries.iter().enumerate() {
            let expected = position as u64 + 1;
            if entry.sequence != expected {
                return Err(StoreError::SequenceGap {
                    expected,
                    found: entry.sequence,
                }
                .into());
            }
        }

        if let Some(last) = entries.last_mut()
            && last.first_index.is_none()
        {
            last.first_index = Some(self.read_first_index(last).await?);
        }

        let mut seen: HashMap<u64, u64> = HashMap::new();
        for entry in &entries {
            if let Some(first_index) = entry.first_index
                && let Some(previous) = seen.insert(first_index, entry.sequence)
            {
                return Err(StoreError::DuplicateFirstIndex {
                    first: previous,
                    second: entry.sequence,
                    first_index,
                }
                .into());
            }
        }

        debug!(
            dir = %self.dir.display(),
            batches = entries.len(),
            "Batch store scanned"
        );
        self.entries = entries;
        Ok(())
    }

    /// Identity of the highest-sequence batch, or `None` for an empty store
    pub fn last_saved_batch_summary(&self) -> Option<BatchSummary> {
        self.entries.last().and_then(StoredBatch::summary)
    }

    /// True iff `first_index` equals the first index of the last saved batch
    pub fn is_duplicate(&self, first_index: u64) -> bool {
        self.entries
            .last()
            .and_then(|e| e.first_index)
            .is_some_and(|last| last == first_index)
    }

    /// Number of fully persisted batches
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// All stored batches in sequence order
    pub fn batches(&self) -> &[StoredBatch] {
        &self.entries
    }

    /// Number of stored batches whose transaction was not acknowledged
    pub fn unconfirmed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.confirmed).count()
    }

    /// Commit `batch` as the next sequence number
    ///
    /// The batch becomes visible in a single rename; on failure nothing is
    /// left behind that a later scan would pick up.
    ///
    /// # Errors
    /// [`StoreError::EmptyBatch`] for a batch without records,
    /// [`StoreError::DuplicateFirstIndex`] when any stored batch already starts
    /// at the same index (nothing is written),
    /// [`StoreError::Write`] for any I/O failure.
    pub async fn persist(&mut self, batch: &Batch) -> Result<BatchSummary> {
        let first_index = batch.first_index.ok_or(StoreError::EmptyBatch)?;
        let sequence = self.entries.len() as u64 + 1;
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.first_index == Some(first_index))
        {
            return Err(StoreError::DuplicateFirstIndex {
                first: existing.sequence,
                second: sequence,
                first_index,
            }
            .into());
        }
        let name = batch_file_name(sequence, first_index, false);
        let path = self.dir.join(&name);
        let partial = self.dir.join(format!(".{name}{PARTIAL_SUFFIX}"));

        if let Err(source) = write_atomic(&partial, &path, &batch.payload).await {
            if let Err(e) = tokio::fs::remove_file(&partial).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %partial.display(), error = %e, "Could not remove partial batch file");
            }
            return Err(StoreError::Write {
                sequence,
                path,
                source,
            }
            .into());
        }

        info!(
            sequence,
            first_index,
            records = batch.record_count,
            path = %path.display(),
            "Batch saved"
        );

        let entry = StoredBatch {
            sequence,
            first_index: Some(first_index),
            confirmed: false,
            path,
        };
        let summary = entry.summary().ok_or(StoreError::UnknownBatch(sequence))?;
        self.entries.push(entry);
        Ok(summary)
    }

    /// Record that the server transaction for batch `sequence` was acknowledged
    ///
    /// Renames the file to carry the confirmation marker. Confirming an already
    /// confirmed batch is a no-op.
    pub async fn mark_confirmed(&mut self, sequence: u64) -> Result<()> {
        let dir = self.dir.clone();
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.sequence == sequence)
            .ok_or(StoreError::UnknownBatch(sequence))?;
        if entry.confirmed {
            return Ok(());
        }
        let Some(first_index) = entry.first_index else {
            return Err(StoreError::UnreadableBatch {
                sequence,
                path: entry.path.clone(),
                reason: "first index unknown, cannot rename".to_string(),
            }
            .into());
        };

        let target = dir.join(batch_file_name(sequence, first_index, true));
        let rename = async {
            tokio::fs::rename(&entry.path, &target).await?;
            sync_dir(&dir).await
        };
        rename.await.map_err(|source| StoreError::Write {
            sequence,
            path: target.clone(),
            source,
        })?;

        debug!(sequence, path = %target.display(), "Batch marked confirmed");
        entry.path = target;
        entry.confirmed = true;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<StoredBatch>> {
        let read_err = |source| StoreError::Read {
            path: self.dir.clone(),
            source,
        };
        let mut listing = tokio::fs::read_dir(&self.dir).await.map_err(read_err)?;
        let mut entries = Vec::new();

        while let Some(dir_entry) = listing.next_entry().await.map_err(read_err)? {
            let file_name = dir_entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX) {
                let path = dir_entry.path();
                warn!(path = %path.display(), "Removing incomplete batch left by an interrupted write");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Could not remove partial batch file");
                }
                continue;
            }

            let is_file = dir_entry
                .file_type()
                .await
                .map_err(|source| {
                    warn!(file = name, error = %source, "Could not stat store entry");
                    StoreError::Read {
                        path: dir_entry.path(),
                        source,
                    }
                })?
                .is_file();
            match parse_batch_file_name(name).filter(|_| is_file) {
                Some(parsed) => entries.push(StoredBatch {
                    sequence: parsed.sequence,
                    first_index: parsed.first_index,
                    confirmed: parsed.confirmed,
                    path: dir_entry.path(),
                }),
                None => debug!(file = name, "Ignoring non-batch file in store"),
            }
        }

        Ok(entries)
    }

    async fn read_first_index(&self, entry: &StoredBatch) -> Result<u64> {
        let unreadable = |reason: String| StoreError::UnreadableBatch {
            sequence: entry.sequence,
            path: entry.path.clone(),
            reason,
        };
        let content = tokio::fs::read(&entry.path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        let doc = self
            .parser
            .parse(&content)
            .map_err(|e| unreadable(e.to_string()))?;
        let first_index = doc
            .first_index
            .ok_or_else(|| unreadable("batch holds no records".to_string()))?;
        Ok(first_index)
    }
}

async fn write_atomic(partial: &Path, target: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(partial).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(partial, target).await?;
    match target.parent() {
        Some(dir) => sync_dir(dir).await,
        None => Ok(()),
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
