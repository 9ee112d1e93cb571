//! HTTP implementation of [`SessionClient`]
//!
//! The service is a single servlet endpoint driven by query parameters:
//!
//! | request      | parameters                                              |
//! |--------------|---------------------------------------------------------|
//! | log in       | `mode=login&id=..&p=..` → `<session token=".."/>`       |
//! | fetch batch  | `mode=getdb&id=..&session=..&offset=..&count=..`        |
//! | confirm      | `mode=confirm&id=..&session=..&transactionId=..`        |
//!
//! Failures are reported as an `<error>` document or through the HTTP status.

use super::{Credentials, Session, SessionClient};
use crate::config::ServiceConfig;
use crate::document::DocumentParser;
use crate::error::{Error, Result};
use crate::types::Batch;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

/// Root attributes that may carry the session token in a login response
const TOKEN_ATTRIBUTES: [&str; 2] = ["token", "sessionId"];

/// [`SessionClient`] speaking to the catalog servlet over HTTP
#[derive(Clone, Debug)]
pub struct HttpSessionClient {
    http: reqwest::Client,
    base_url: Url,
    parser: DocumentParser,
}

impl HttpSessionClient {
    /// Create a client for the configured service
    ///
    /// # Errors
    /// Returns a configuration error for an invalid base URL or when the HTTP
    /// client cannot be built.
    pub fn new(config: &ServiceConfig, parser: DocumentParser) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::config("service.base_url", format!("invalid URL: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self {
            http,
            base_url,
            parser,
        })
    }

    async fn get(&self, query: &[(&str, &str)]) -> reqwest::Result<reqwest::Response> {
        self.http
            .get(self.base_url.clone())
            .query(query)
            .send()
            .await
            // URLs carry credentials or the session token
            .map_err(reqwest::Error::without_url)
    }
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session> {
        debug!(client_id = %credentials.client_id, "Authenticating");
        let response = self
            .get(&[
                ("mode", "login"),
                ("id", credentials.client_id.as_str()),
                ("p", credentials.password.as_str()),
            ])
            .await
            .map_err(|e| Error::Auth(format!("cannot reach {}: {}", self.base_url, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!(
                "credentials rejected (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "login returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Auth(format!("failed to read login response: {}", e.without_url())))?;
        let doc = self
            .parser
            .parse(&body)
            .map_err(|e| Error::Auth(format!("unexpected login response: {}", e)))?;
        if let Some(message) = doc.error_message {
            return Err(Error::Auth(message));
        }

        let token = TOKEN_ATTRIBUTES
            .iter()
            .find_map(|name| doc.root_attribute(name))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::Auth("login response carries no session token".to_string()))?;

        debug!(client_id = %credentials.client_id, "Session established");
        Ok(Session::new(credentials.client_id.clone(), token))
    }

    async fn fetch_batch(&self, session: &Session, offset: u64, batch_size: u32) -> Result<Batch> {
        let offset_param = offset.to_string();
        let count_param = batch_size.to_string();
        let response = self
            .get(&[
                ("mode", "getdb"),
                ("id", session.client_id.as_str()),
                ("session", session.token.as_str()),
                ("offset", offset_param.as_str()),
                ("count", count_param.as_str()),
            ])
            .await
            .map_err(|e| classify_request_error(offset, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(offset, status));
        }

        let body = response.bytes().await.map_err(|e| Error::TransientFetch {
            offset,
            reason: format!("failed to read response body: {}", e.without_url()),
        })?;

        let batch = self
            .parser
            .parse_batch(body.to_vec())
            .map_err(|e| Error::FatalFetch {
                offset,
                reason: e.to_string(),
            })?;

        debug!(
            offset,
            records = batch.record_count,
            first_index = ?batch.first_index,
            "Batch received"
        );
        Ok(batch)
    }

    async fn confirm(&self, session: &Session, transaction_id: &str) -> Result<()> {
        let confirm_err = |reason: String| Error::Confirm {
            transaction_id: transaction_id.to_string(),
            reason,
        };
        let response = self
            .get(&[
                ("mode", "confirm"),
                ("id", session.client_id.as_str()),
                ("session", session.token.as_str()),
                ("transactionId", transaction_id),
            ])
            .await
            .map_err(|e| confirm_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(confirm_err(format!("HTTP {}", status.as_u16())));
        }

        // The acknowledgement body is optional; only an explicit error document counts
        let body = response.bytes().await.map_err(|e| {
            confirm_err(format!("failed to read response: {}", e.without_url()))
        })?;
        if let Ok(doc) = self.parser.parse(&body)
            && let Some(message) = doc.error_message
        {
            return Err(confirm_err(message));
        }

        debug!(transaction_id, "Transaction confirmed");
        Ok(())
    }
}

/// Classify a failure to get any response at all
fn classify_request_error(offset: u64, e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::FatalFetch {
            offset,
            reason: format!("invalid request: {}", e),
        }
    } else {
        // timeouts, refused/reset connections, DNS failures
        Error::TransientFetch {
            offset,
            reason: e.to_string(),
        }
    }
}

/// Classify a non-success HTTP status
fn classify_status(offset: u64, status: StatusCode) -> Error {
    let transient = status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT;
    if transient {
        Error::TransientFetch {
            offset,
            reason: format!("HTTP {}", status.as_u16()),
        }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::FatalFetch {
            offset,
            reason: format!("session rejected (HTTP {})", status.as_u16()),
        }
    } else {
        Error::FatalFetch {
            offset,
            reason: format!("HTTP {}", status.as_u16()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SERVLET: &str = "/oferta/servlet/";

    fn client(server: &MockServer) -> HttpSessionClient {
        let config = ServiceConfig {
            base_url: format!("{}{}", server.uri(), SERVLET),
            request_timeout: Duration::from_millis(500),
            ..ServiceConfig::default()
        };
        HttpSessionClient::new(&config, DocumentParser::new(DocumentConfig::default())).unwrap()
    }

    fn session() -> Session {
        Session::new("FAKE_ID", "tok-1")
    }

    fn credentials() -> Credentials {
        Credentials::new("FAKE_ID", "FAKE_PASSWORD")
    }

    #[tokio::test]
    async fn authenticate_returns_session_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SERVLET))
            .and(query_param("mode", "login"))
            .and(query_param("id", "FAKE_ID"))
            .and(query_param("p", "FAKE_PASSWORD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<session token="tok-1"/>"#))
            .expect(1)
            .mount(&server)
            .await;

        let session = client(&server).authenticate(&credentials()).await.unwrap();

        assert_eq!(session.client_id, "FAKE_ID");
        assert_eq!(session.token, "tok-1");
    }

    #[tokio::test]
    async fn authenticate_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("mode", "login"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = client(&server).authenticate(&credentials()).await;

        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn authenticate_error_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("mode", "login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<error>bad password</error>"))
            .mount(&server)
            .await;

        match client(&server).authenticate(&credentials()).await {
            Err(Error::Auth(message)) => assert_eq!(message, "bad password"),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authenticate_unreachable_host_does_not_leak_password() {
        let config = ServiceConfig {
            // reserved port, nothing listens there
            base_url: "http://127.0.0.1:9/servlet/".to_string(),
            request_timeout: Duration::from_millis(500),
            ..ServiceConfig::default()
        };
        let client = HttpSessionClient::new(&config, DocumentParser::default()).unwrap();

        match client.authenticate(&credentials()).await {
            Err(Error::Auth(message)) => {
                assert!(!message.contains("FAKE_PASSWORD"), "leaked: {message}")
            }
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_batch_sends_offset_and_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SERVLET))
            .and(query_param("mode", "getdb"))
            .and(query_param("session", "tok-1"))
            .and(query_param("offset", "500"))
            .and(query_param("count", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<books transactionId="tx-2"><book indeks="501"/><book indeks="502"/></books>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let batch = client(&server).fetch_batch(&session(), 500, 500).await.unwrap();

        assert_eq!(batch.first_index, Some(501));
        assert_eq!(batch.record_count, 2);
        assert_eq!(batch.transaction_id.as_deref(), Some("tx-2"));
    }

    #[tokio::test]
    async fn fetch_batch_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("mode", "getdb"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server).fetch_batch(&session(), 0, 500).await;

        assert!(matches!(result, Err(Error::TransientFetch { offset: 0, .. })));
    }

    #[tokio::test]
    async fn fetch_batch_too_many_requests_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let result = client(&server).fetch_batch(&session(), 0, 500).await;

        assert!(matches!(result, Err(Error::TransientFetch { .. })));
    }

    #[tokio::test]
    async fn fetch_batch_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<books><book indeks="1"/></books>"#)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let result = client(&server).fetch_batch(&session(), 0, 500).await;

        assert!(matches!(result, Err(Error::TransientFetch { .. })));
    }

    #[tokio::test]
    async fn fetch_batch_expired_session_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client(&server).fetch_batch(&session(), 1000, 500).await;

        match result {
            Err(Error::FatalFetch { offset, reason }) => {
                assert_eq!(offset, 1000);
                assert!(reason.contains("401"));
            }
            other => panic!("expected fatal fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_batch_malformed_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<books><book indeks="))
            .mount(&server)
            .await;

        let result = client(&server).fetch_batch(&session(), 0, 500).await;

        assert!(matches!(result, Err(Error::FatalFetch { .. })));
    }

    #[tokio::test]
    async fn fetch_batch_error_document_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<error>session expired</error>"))
            .mount(&server)
            .await;

        match client(&server).fetch_batch(&session(), 0, 500).await {
            Err(Error::FatalFetch { reason, .. }) => assert!(reason.contains("session expired")),
            other => panic!("expected fatal fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirm_sends_transaction_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("mode", "confirm"))
            .and(query_param("transactionId", "tx-9"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).confirm(&session(), "tx-9").await.unwrap();
    }

    #[tokio::test]
    async fn confirm_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("mode", "confirm"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client(&server).confirm(&session(), "tx-9").await;

        match result {
            Err(Error::Confirm { transaction_id, .. }) => assert_eq!(transaction_id, "tx-9"),
            other => panic!("expected confirm error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirm_truncated_acknowledgement_is_reported() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Promises 100 bytes, sends 3 and hangs up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n<ok")
                .await
                .unwrap();
        });
        let config = ServiceConfig {
            base_url: format!("http://{}{}", addr, SERVLET),
            request_timeout: Duration::from_secs(5),
            ..ServiceConfig::default()
        };
        let client = HttpSessionClient::new(&config, DocumentParser::default()).unwrap();

        let result = client.confirm(&session(), "tx-9").await;

        match result {
            Err(Error::Confirm { transaction_id, reason }) => {
                assert_eq!(transaction_id, "tx-9");
                assert!(reason.contains("failed to read response"), "reason: {reason}");
            }
            other => panic!("expected confirm error, got {other:?}"),
        }
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(0, StatusCode::BAD_GATEWAY),
            Error::TransientFetch { .. }
        ));
        assert!(matches!(
            classify_status(0, StatusCode::REQUEST_TIMEOUT),
            Error::TransientFetch { .. }
        ));
        assert!(matches!(
            classify_status(0, StatusCode::BAD_REQUEST),
            Error::FatalFetch { .. }
        ));
        assert!(matches!(
            classify_status(0, StatusCode::NOT_FOUND),
            Error::FatalFetch { .. }
        ));
    }
}
