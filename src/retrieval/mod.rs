//! The resumable retrieval loop
//!
//! A run walks through these phases:
//!
//! ```text
//! Init -> Authenticating -> Fetching -> DedupCheck -> Persisting -> Waiting -> Fetching ...
//!                                                                  \-> Done | Failed | Cancelled
//! ```
//!
//! Nothing about progress is remembered between runs except the batch files
//! themselves. `Init` derives the resume offset (`count * batch_size`) and the
//! last first index from the store, and a run that finds the expected total
//! already covered ends without touching the network.
//!
//! Cancellation is cooperative. The token is checked before every fetch and
//! before every wait; a fetch in flight, a rate-limit wait or a persist always
//! runs to completion first.

use crate::client::{Credentials, HttpSessionClient, Session, SessionClient};
use crate::config::{Config, RetrievalConfig, RetryConfig};
use crate::document::DocumentParser;
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryOutcome, retry_rate_limited};
use crate::store::BatchStore;
use crate::types::{Batch, Outcome, Phase, Progress, RunReport, format_eta};
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};


/// Counters for the run in progress
#[derive(Debug)]
struct RunCounters {
    started_at: DateTime<Utc>,
    batches_at_start: usize,
    persisted: usize,
    duplicates: usize,
    consecutive_duplicates: u32,
    fetch_requests: u32,
}

impl RunCounters {
    fn new(batches_at_start: usize) -> Self {
        Self {
            started_at: Utc::now(),
            batches_at_start,
            persisted: 0,
            duplicates: 0,
            consecutive_duplicates: 0,
            fetch_requests: 0,
        }
    }
}

/// Drives batches from a [`SessionClient`] into a [`BatchStore`]
pub struct Retriever<C> {
    client: C,
    store: BatchStore,
    limiter: RateLimiter,
    credentials: Credentials,
    retrieval: RetrievalConfig,
    retry: RetryConfig,
    cancel: CancellationToken,
    phase: Phase,
}

impl Retriever<HttpSessionClient> {
    /// Build a retriever talking HTTP to the configured service
    ///
    /// Validates the configuration and opens (creating if needed) the store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let parser = DocumentParser::new(config.document.clone());
        let client = HttpSessionClient::new(&config.service, parser.clone())?;
        let store = BatchStore::open(&config.store.output_dir, parser).await?;
        let credentials = Credentials::new(
            config.service.client_id.clone(),
            config.service.password.clone(),
        );
        Ok(Self::new(client, store, credentials, config))
    }
}

impl<C: SessionClient> Retriever<C> {
    /// Create a retriever from its parts
    pub fn new(client: C, store: BatchStore, credentials: Credentials, config: &Config) -> Self {
        Self {
            client,
            store,
            limiter: RateLimiter::new(config.retrieval.min_request_interval),
            credentials,
            retrieval: config.retrieval.clone(),
            retry: config.retry.clone(),
            cancel: CancellationToken::new(),
            phase: Phase::Init,
        }
    }

    /// Use `token` to request cancellation
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run at the next step boundary when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current phase of the state machine
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The underlying batch store
    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    /// The session client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Progress derived from the store
    pub fn progress(&self) -> Progress {
        Progress::new(
            self.store.count(),
            self.retrieval.batch_size,
            self.retrieval.total_records,
        )
    }

    /// Run until the expected total is stored, the data ends, cancellation, or failure
    ///
    /// # Errors
    /// Every failure is returned as [`Error::Aborted`], naming the batch sequence
    /// number being retrieved and the number of batches saved. Batches stored
    /// before the failure stay in place; re-running resumes after them.
    pub async fn run(&mut self) -> Result<RunReport> {
        self.enter(Phase::Init);
        if let Err(e) = self.store.refresh().await {
            return Err(self.abort(e, 0));
        }
        let mut counters = RunCounters::new(self.store.count());
        self.log_progress_header();

        if self.progress().is_complete() {
            info!(
                batches = self.store.count(),
                "Expected records already stored, nothing to fetch"
            );
            return Ok(self.finish(Outcome::Complete, &counters));
        }
        if self.cancel.is_cancelled() {
            return Ok(self.finish(Outcome::Cancelled, &counters));
        }

        self.enter(Phase::Authenticating);
        let session = match self.client.authenticate(&self.credentials).await {
            Ok(session) => session,
            Err(e) => return Err(self.abort(e, 0)),
        };

        // The previous run's last request time is unknown after a restart
        let mut last_request = (self.retrieval.resume_cooldown && counters.batches_at_start > 0)
            .then(Instant::now);

        loop {
            let sequence = self.store.count() as u64 + 1;
            let offset = self.offset();

            self.enter(Phase::Fetching);
            let client = &self.client;
            let session_ref = &session;
            let batch_size = self.retrieval.batch_size;
            let attempts = retry_rate_limited(
                &self.retry,
                &self.limiter,
                last_request,
                &self.cancel,
                move |attempt| {
                    debug!(sequence, offset, attempt, "Requesting batch");
                    client.fetch_batch(session_ref, offset, batch_size)
                },
            )
            .await;
            counters.fetch_requests += attempts.attempts;
            last_request = attempts.last_request;

            let batch = match attempts.outcome {
                RetryOutcome::Success(batch) => batch,
                RetryOutcome::Cancelled => return Ok(self.finish(Outcome::Cancelled, &counters)),
                RetryOutcome::Failed(e) => return Err(self.abort(e, attempts.attempts)),
            };

            let Some(first_index) = batch.first_index.filter(|_| !batch.is_empty()) else {
                info!(sequence, offset, "Service returned no records, end of data");
                return Ok(self.finish(Outcome::EndOfData, &counters));
            };

            self.enter(Phase::DedupCheck);
            if self.store.is_duplicate(first_index) {
                counters.duplicates += 1;
                counters.consecutive_duplicates += 1;
                warn!(
                    sequence,
                    first_index,
                    consecutive = counters.consecutive_duplicates,
                    "Duplicate batch (first record index matches last saved batch), discarding"
                );
                // The server re-delivered the last stored batch; acknowledging it lets it move on
                if let Some(last) = self.store.last_saved_batch_summary() {
                    self.acknowledge(&session, &batch, last.sequence).await;
                }
                if counters.consecutive_duplicates > self.retrieval.max_consecutive_duplicates {
                    let e = Error::NoProgress {
                        duplicates: counters.consecutive_duplicates,
                        first_index,
                    };
                    return Err(self.abort(e, attempts.attempts));
                }
                if let Err(e) = self.store.refresh().await {
                    return Err(self.abort(e, attempts.attempts));
                }
            } else {
                counters.consecutive_duplicates = 0;
                self.enter(Phase::Persisting);
                let summary = match self.store.persist(&batch).await {
                    Ok(summary) => summary,
                    Err(e) => return Err(self.abort(e, attempts.attempts)),
                };
                counters.persisted += 1;
                self.acknowledge(&session, &batch, summary.sequence).await;
            }

            let progress = self.progress();
            if progress.is_complete() {
                info!(
                    batches = self.store.count(),
                    records = progress.records_saved,
                    "Expected total reached"
                );
                return Ok(self.finish(Outcome::Complete, &counters));
            }

            if self.cancel.is_cancelled() {
                return Ok(self.finish(Outcome::Cancelled, &counters));
            }
            self.enter(Phase::Waiting);
            info!(
                saved = progress.records_saved,
                remaining = progress.remaining_records(),
                eta = %format_eta(progress.estimated_remaining(self.limiter.min_interval())),
                "Progress"
            );
        }
    }

    fn offset(&self) -> u64 {
        self.store.count() as u64 * u64::from(self.retrieval.batch_size)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }

    /// Confirm the batch's transaction and mark stored batch `sequence` as confirmed
    ///
    /// Failures are logged only: an unconfirmed batch is re-delivered by the
    /// server, caught as a duplicate and confirmed then.
    async fn acknowledge(&mut self, session: &Session, batch: &Batch, sequence: u64) {
        let Some(transaction_id) = batch.transaction_id.as_deref() else {
            debug!(sequence, "Batch carries no transaction id, nothing to confirm");
            return;
        };
        match self.client.confirm(session, transaction_id).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_confirmed(sequence).await {
                    warn!(sequence, error = %e, "Batch confirmed but marker could not be written");
                } else {
                    info!(sequence, transaction_id, "Batch confirmed");
                }
            }
            Err(e) => warn!(
                sequence,
                error = %e,
                "Confirmation failed; the batch stays unconfirmed and will be re-delivered"
            ),
        }
    }

    fn log_progress_header(&self) {
        let progress = self.progress();
        info!(
            total_records = progress.total_records,
            already_downloaded = progress.records_saved,
            remaining = progress.remaining_records(),
            batches_left = progress.remaining_batches(),
            eta = %format_eta(progress.estimated_remaining(self.limiter.min_interval())),
            output_dir = %self.store.dir().display(),
            "Starting download"
        );
        if let Some(last) = self.store.last_saved_batch_summary() {
            info!(
                sequence = last.sequence,
                first_index = last.first_index,
                confirmed = last.confirmed,
                "Resuming after last saved batch"
            );
        }
    }

    fn abort(&mut self, e: Error, attempts: u32) -> Error {
        self.enter(Phase::Failed);
        let sequence = self.store.count() as u64 + 1;
        let offset = self.offset();
        let batches_saved = self.store.count();
        error!(
            sequence,
            offset,
            attempts,
            batches_saved,
            error_code = e.error_code(),
            error = %e,
            "Retrieval failed"
        );
        Error::Aborted {
            sequence,
            offset,
            attempts,
            batches_saved,
            source: Box::new(e),
        }
    }

    fn finish(&mut self, outcome: Outcome, counters: &RunCounters) -> RunReport {
        self.enter(outcome.phase());
        let report = RunReport {
            outcome,
            batches_at_start: counters.batches_at_start,
            batches_saved: self.store.count(),
            batches_persisted: counters.persisted,
            duplicates_discarded: counters.duplicates,
            fetch_requests: counters.fetch_requests,
            started_at: counters.started_at,
            finished_at: Utc::now(),
        };
        info!(
            outcome = ?report.outcome,
            batches_saved = report.batches_saved,
            batches_persisted = report.batches_persisted,
            duplicates = report.duplicates_discarded,
            requests = report.fetch_requests,
            "Retrieval finished"
        );
        report
    }
}
