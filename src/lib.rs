//! # bookfeed-dl
//!
//! Resumable, rate-limited batch retrieval of book catalog records from a
//! paginated, session-authenticated service.
//!
//! ## Design Philosophy
//!
//! bookfeed-dl is designed to be:
//! - **Restartable** - All progress lives in the batch files; killing the process
//!   at any point and starting it again continues where it stopped
//! - **Idempotent** - A batch the server delivers twice is stored once
//! - **Polite** - Requests are spaced by a minimum interval, retries included
//!
//! ## Quick Start
//!
//! ```no_run
//! use bookfeed_dl::{Config, Retriever};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.service.client_id = "12345".to_string();
//!     config.service.password = "secret".to_string();
//!
//!     let mut retriever = Retriever::from_config(&config).await?;
//!     bookfeed_dl::cancel_on_signal(retriever.cancellation_token());
//!
//!     let report = retriever.run().await?;
//!     println!("{} batches stored", report.batches_saved);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Session client trait and HTTP implementation
pub mod client;
/// Configuration types
pub mod config;
/// Batch document parsing
pub mod document;
/// Error types
pub mod error;
/// Minimum-interval rate limiting
pub mod rate_limiter;
/// The resumable retrieval loop
pub mod retrieval;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable batch store
pub mod store;
/// Core types
pub mod types;

// Re-export commonly used types
pub use client::{Credentials, HttpSessionClient, Session, SessionClient};
pub use config::{Config, DocumentConfig, RetrievalConfig, RetryConfig, ServiceConfig, StoreConfig};
pub use document::{BatchDocument, DocumentParser};
pub use error::{Error, Result, StoreError};
pub use rate_limiter::RateLimiter;
pub use retrieval::Retriever;
pub use store::{BatchStore, StoredBatch};
pub use types::{Batch, BatchSummary, Outcome, Phase, Progress, RunReport};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// The retrieval loop notices the cancellation at its next step boundary, so a
/// batch being written is always completed first.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let token = CancellationToken::new();
/// let watcher = bookfeed_dl::cancel_on_signal(token.clone());
/// token.cancelled().await;
/// # drop(watcher);
/// # }
/// ```
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Stopping after the current step");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(term), Err(int)) => {
            tracing::error!(
                sigterm_error = %term,
                sigint_error = %int,
                "Could not register any signal handlers, using ctrl_c fallback"
            );
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
