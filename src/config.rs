//! Configuration types for bookfeed-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Remote service connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the catalog servlet
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Client identifier used to authenticate
    #[serde(default)]
    pub client_id: String,

    /// Password used to authenticate (never serialized back out)
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Per-request timeout (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: String::new(),
            password: String::new(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("password", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Retrieval loop behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Total number of records expected from the service (default: 164000)
    ///
    /// The loop stops once `batches_saved * batch_size` reaches this number.
    #[serde(default = "default_total_records")]
    pub total_records: u64,

    /// Number of records requested per batch (default: 500)
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Minimum time between the completion of one request and the start of the next
    /// (default: 60 seconds)
    #[serde(default = "default_min_request_interval", with = "duration_serde")]
    pub min_request_interval: Duration,

    /// Delay the first request of a resumed run by the minimum interval (default: true)
    ///
    /// The previous run's last request time is unknown after a restart, so the
    /// conservative choice is to assume it just happened.
    #[serde(default = "default_true")]
    pub resume_cooldown: bool,

    /// Consecutive duplicate batches tolerated before giving up (default: 5)
    #[serde(default = "default_max_consecutive_duplicates")]
    pub max_consecutive_duplicates: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            total_records: default_total_records(),
            batch_size: default_batch_size(),
            min_request_interval: default_min_request_interval(),
            resume_cooldown: true,
            max_consecutive_duplicates: default_max_consecutive_duplicates(),
        }
    }
}

/// Retry behavior for transient fetch failures
///
/// Every retry is still subject to the rate limiter; the backoff only ever
/// lengthens the wait beyond the minimum request interval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Upper bound for the backoff (default: 600 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to the backoff (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Batch store location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one file per batch (default: "./batches")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

/// Names used to pick the few fields read out of a batch document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Element name of a single record (default: "book")
    #[serde(default = "default_record_element")]
    pub record_element: String,

    /// Attribute on a record holding its global index (default: "indeks")
    #[serde(default = "default_index_attribute")]
    pub index_attribute: String,

    /// Attribute on the root element holding the transaction id (default: "transactionId")
    #[serde(default = "default_transaction_attribute")]
    pub transaction_attribute: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            record_element: default_record_element(),
            index_attribute: default_index_attribute(),
            transaction_attribute: default_transaction_attribute(),
        }
    }
}

/// Main configuration for bookfeed-dl
///
/// Every field has a default, so a configuration file only needs to name what
/// it changes. Credentials are usually supplied on the command line or through
/// the environment instead of the file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote service connection
    #[serde(default)]
    pub service: ServiceConfig,

    /// Retrieval loop behavior
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Transient failure retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Batch document field names
    #[serde(default)]
    pub document: DocumentConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their defaults. The result is not validated; call
    /// [`Config::validate`] once command line overrides have been applied.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config = serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("cannot parse {}: {}", path.display(), e),
            key: None,
        })?;
        Ok(config)
    }

    /// Check the settings a retrieval run depends on
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.service.base_url).map_err(|e| {
            Error::config(
                "service.base_url",
                format!("invalid URL {:?}: {}", self.service.base_url, e),
            )
        })?;
        if self.service.client_id.trim().is_empty() {
            return Err(Error::config("service.client_id", "client id is required"));
        }
        if self.service.password.is_empty() {
            return Err(Error::config("service.password", "password is required"));
        }
        if self.retrieval.batch_size == 0 {
            return Err(Error::config(
                "retrieval.batch_size",
                "batch size must be greater than zero",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!(
                    "backoff multiplier must be between 1.0 and {}",
                    MAX_BACKOFF_MULTIPLIER
                ),
            ));
        }
        if self.document.record_element.is_empty() || self.document.index_attribute.is_empty() {
            return Err(Error::config(
                "document",
                "record element and index attribute names must not be empty",
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://services.azymut.pl/oferta/servlet/".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_user_agent() -> String {
    concat!("bookfeed-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_total_records() -> u64 {
    164_000
}

fn default_batch_size() -> u32 {
    500
}

fn default_min_request_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_max_consecutive_duplicates() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(600)
}

/// Upper bound accepted for `retry.backoff_multiplier`
const MAX_BACKOFF_MULTIPLIER: f64 = 100.0;

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./batches")
}

fn default_record_element() -> String {
    "book".to_string()
}

fn default_index_attribute() -> String {
    "indeks".to_string()
}

fn default_transaction_attribute() -> String {
    "transactionId".to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
