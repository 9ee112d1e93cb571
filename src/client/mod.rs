//! Session client for the catalog service
//!
//! [`SessionClient`] is the seam between the retrieval loop and the network.
//! [`HttpSessionClient`] talks to the real servlet; tests substitute scripted
//! clients. Implementations issue exactly one request per call and never retry
//! on their own: the retrieval loop owns the retry policy.

use crate::error::Result;
use crate::types::Batch;
use async_trait::async_trait;

mod http;

pub use http::HttpSessionClient;

/// Client identifier and password
#[derive(Clone)]
pub struct Credentials {
    /// Client identifier issued by the service
    pub client_id: String,
    /// Password for the client identifier
    pub password: String,
}

impl Credentials {
    /// Bundle a client id and password
    pub fn new(client_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated session
#[derive(Clone)]
pub struct Session {
    /// Client the session belongs to
    pub client_id: String,
    /// Opaque token returned by the service
    pub token: String,
}

impl Session {
    /// Create a session from a token
    pub fn new(client_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Access to the remote batch service
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Obtain a session for `credentials`
    ///
    /// # Errors
    /// [`Error::Auth`](crate::Error::Auth) when the credentials are rejected or
    /// the host cannot be reached.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session>;

    /// Fetch `batch_size` records starting at record `offset`
    ///
    /// # Errors
    /// [`Error::TransientFetch`](crate::Error::TransientFetch) for network,
    /// timeout and server-side failures;
    /// [`Error::FatalFetch`](crate::Error::FatalFetch) for malformed responses,
    /// rejected requests and expired sessions.
    async fn fetch_batch(&self, session: &Session, offset: u64, batch_size: u32) -> Result<Batch>;

    /// Acknowledge that the batch delivered under `transaction_id` is stored
    ///
    /// # Errors
    /// [`Error::Confirm`](crate::Error::Confirm) when the service does not
    /// accept the acknowledgement.
    async fn confirm(&self, session: &Session, transaction_id: &str) -> Result<()>;
}
