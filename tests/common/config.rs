//! Test configuration helpers

use super::fixtures::SERVLET;
use bookfeed_dl::config::{RetrievalConfig, RetryConfig, ServiceConfig, StoreConfig};
use bookfeed_dl::{Config, HttpSessionClient, Retriever};
use std::path::Path;
use std::time::Duration;
use wiremock::MockServer;

/// Interval between requests in integration tests
pub const TEST_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration pointing at `server`, storing into `dir`
pub fn test_config(server: &MockServer, dir: &Path, total_records: u64, batch_size: u32) -> Config {
    Config {
        service: ServiceConfig {
            base_url: format!("{}{}", server.uri(), SERVLET),
            client_id: "FAKE_ID".to_string(),
            password: "FAKE_PASSWORD".to_string(),
            request_timeout: Duration::from_secs(5),
            ..ServiceConfig::default()
        },
        retrieval: RetrievalConfig {
            total_records,
            batch_size,
            min_request_interval: TEST_INTERVAL,
            resume_cooldown: true,
            max_consecutive_duplicates: 3,
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        store: StoreConfig {
            output_dir: dir.to_path_buf(),
        },
        ..Config::default()
    }
}

/// Build a retriever for `config`, panicking on setup failures
pub async fn create_retriever(config: &Config) -> Retriever<HttpSessionClient> {
    Retriever::from_config(config)
        .await
        .expect("Failed to create retriever")
}
