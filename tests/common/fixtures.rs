//! A simulated catalog service served by wiremock

use std::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Path of the servlet on the mock server
pub const SERVLET: &str = "/oferta/servlet/";

/// Session token handed out by the mock login
pub const TOKEN: &str = "tok-integration";

/// Catalog document holding records `first..=last`
pub fn catalog_xml(first: u64, last: u64) -> String {
    let mut xml = format!(r#"<?xml version="1.0" encoding="UTF-8"?><books transactionId="tx-{}">"#, first);
    for index in first..=last {
        xml.push_str(&format!(
            r#"<book indeks="{0}"><tytul>Title {0}</tytul></book>"#,
            index
        ));
    }
    xml.push_str("</books>");
    xml
}

/// Answers `getdb` requests from a catalog of `total` records
///
/// Records are numbered from 1, so the batch at offset `n` starts at `n + 1`.
pub struct Catalog {
    total: u64,
    redeliver: Mutex<Option<(u64, u64)>>,
}

impl Catalog {
    /// A catalog of `total` records
    pub fn new(total: u64) -> Self {
        Self {
            total,
            redeliver: Mutex::new(None),
        }
    }

    /// Answer the first request for `offset` with the batch starting at `first` instead
    pub fn redelivering(self, offset: u64, first: u64) -> Self {
        *self.redeliver.lock().unwrap() = Some((offset, first));
        self
    }
}

impl Respond for Catalog {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == name)
                .and_then(|(_, value)| value.parse::<u64>().ok())
        };
        let (Some(offset), Some(count)) = (param("offset"), param("count")) else {
            return ResponseTemplate::new(400).set_body_string("<error>bad request</error>");
        };

        let mut first = offset + 1;
        let mut redeliver = self.redeliver.lock().unwrap();
        if let Some((at, replay)) = *redeliver
            && at == offset
        {
            first = replay;
            *redeliver = None;
        }

        if first > self.total {
            return ResponseTemplate::new(200).set_body_string("<books></books>");
        }
        let last = (first + count - 1).min(self.total);
        ResponseTemplate::new(200).set_body_string(catalog_xml(first, last))
    }
}

/// Mount login and confirm endpoints that always succeed
pub async fn mount_session(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SERVLET))
        .and(query_param("mode", "login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!(r#"<session token="{}"/>"#, TOKEN)),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(SERVLET))
        .and(query_param("mode", "confirm"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<ok/>"))
        .mount(server)
        .await;
}

/// Mount `catalog` behind the `getdb` endpoint
pub async fn mount_catalog(server: &MockServer, catalog: Catalog) {
    Mock::given(method("GET"))
        .and(path(SERVLET))
        .and(query_param("mode", "getdb"))
        .and(query_param("session", TOKEN))
        .respond_with(catalog)
        .mount(server)
        .await;
}

/// Start a server with a working session and a catalog of `total` records
pub async fn start_catalog(total: u64) -> MockServer {
    let server = MockServer::start().await;
    mount_session(&server).await;
    mount_catalog(&server, Catalog::new(total)).await;
    server
}

/// Offsets of the `getdb` requests the server received, in order
pub async fn fetch_offsets(server: &MockServer) -> Vec<u64> {
    requests_with_mode(server, "getdb")
        .await
        .iter()
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(key, _)| key == "offset")
                .and_then(|(_, value)| value.parse().ok())
        })
        .collect()
}

/// Requests the server received for the given `mode`
pub async fn requests_with_mode(server: &MockServer, mode: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.query_pairs().any(|(key, value)| key == "mode" && value == mode))
        .collect()
}
