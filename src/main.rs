//! bookfeed-dl command line
//!
//! `bookfeed-dl fetch` (the default) retrieves batches until the expected total
//! is stored; `bookfeed-dl status` reports what the store holds without
//! contacting the service.
//!
//! Exit status: 0 when done, 1 on failure, 130 when stopped by a signal.

#![warn(clippy::all)]

use bookfeed_dl::{
    BatchStore, Config, DocumentParser, Outcome, Progress, Result, Retriever,
    types::format_eta,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "bookfeed-dl", version, about = "Resumable book catalog downloader")]
struct Cli {
    /// JSON configuration file; command line options override it
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Retrieve batches, resuming after the ones already stored
    Fetch(FetchArgs),
    /// Show what the store holds
    Status(StoreArgs),
}

#[derive(Args, Debug, Default)]
struct StoreArgs {
    /// Directory holding the batch files
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// Total number of records expected
    #[arg(long)]
    total_records: Option<u64>,

    /// Records per batch
    #[arg(long)]
    batch_size: Option<u32>,
}

#[derive(Args, Debug, Default)]
struct FetchArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Client identifier
    #[arg(long, env = "BOOKFEED_CLIENT_ID")]
    client_id: Option<String>,

    /// Password for the client identifier
    #[arg(long, env = "BOOKFEED_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Service endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Minimum seconds between requests
    #[arg(long)]
    delay_secs: Option<u64>,

    /// Retries after a transient failure
    #[arg(long)]
    max_retries: Option<u32>,

    /// Start immediately on resume instead of waiting one interval
    #[arg(long)]
    no_resume_cooldown: bool,
}

impl StoreArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.store.output_dir = dir.clone();
        }
        if let Some(total) = self.total_records {
            config.retrieval.total_records = total;
        }
        if let Some(size) = self.batch_size {
            config.retrieval.batch_size = size;
        }
    }
}

impl FetchArgs {
    fn apply(&self, config: &mut Config) {
        self.store.apply(config);
        if let Some(id) = &self.client_id {
            config.service.client_id = id.clone();
        }
        if let Some(password) = &self.password {
            config.service.password = password.clone();
        }
        if let Some(url) = &self.base_url {
            config.service.base_url = url.clone();
        }
        if let Some(secs) = self.delay_secs {
            config.retrieval.min_request_interval = Duration::from_secs(secs);
        }
        if let Some(retries) = self.max_retries {
            config.retry.max_attempts = retries;
        }
        if self.no_resume_cooldown {
            config.retrieval.resume_cooldown = false;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Could not load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let result = match cli.command.unwrap_or_else(|| Command::Fetch(FetchArgs::default())) {
        Command::Fetch(args) => {
            args.apply(&mut config);
            fetch(&config).await
        }
        Command::Status(args) => {
            args.apply(&mut config);
            status(&config).await.map(|()| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error_code = e.error_code(), error = %e, "bookfeed-dl failed");
            ExitCode::FAILURE
        }
    }
}

async fn fetch(config: &Config) -> Result<ExitCode> {
    let mut retriever = Retriever::from_config(config).await?;
    let watcher = bookfeed_dl::cancel_on_signal(retriever.cancellation_token());
    let report = retriever.run().await;
    watcher.abort();
    let report = report?;

    let elapsed = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();
    tracing::info!(
        batches_saved = report.batches_saved,
        new_batches = report.batches_persisted,
        elapsed = %format_eta(elapsed),
        "Done"
    );
    Ok(match report.outcome {
        Outcome::Complete | Outcome::EndOfData => ExitCode::SUCCESS,
        Outcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
    })
}

async fn status(config: &Config) -> Result<()> {
    let parser = DocumentParser::new(config.document.clone());
    let store = BatchStore::open(&config.store.output_dir, parser).await?;
    let progress = Progress::new(
        store.count(),
        config.retrieval.batch_size,
        config.retrieval.total_records,
    );

    println!("Store:            {}", store.dir().display());
    println!("Batches:          {}", store.count());
    println!("Unconfirmed:      {}", store.unconfirmed_count());
    println!(
        "Records:          {} of {}",
        progress.records_saved, progress.total_records
    );
    match store.last_saved_batch_summary() {
        Some(last) => println!(
            "Last batch:       #{} (first index {})",
            last.sequence, last.first_index
        ),
        None => println!("Last batch:       none"),
    }
    if progress.is_complete() {
        println!("Complete");
    } else {
        println!(
            "Remaining:        {} batches, about {}",
            progress.remaining_batches(),
            format_eta(progress.estimated_remaining(config.retrieval.min_request_interval))
        );
    }
    Ok(())
}
