//! Minimal reader for batch documents
//!
//! The record schema is owned by the service. This reader only walks the
//! document far enough to learn how many records it holds, the index of the
//! first one, the attributes of the root element (transaction id, session
//! token) and whether the service answered with an `<error>` document.

use crate::config::DocumentConfig;
use crate::error::{Error, Result};
use crate::types::Batch;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;

/// Root element name the service uses to report a failure
const ERROR_ROOT: &str = "error";

/// What was read out of a document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchDocument {
    /// Local name of the root element
    pub root: String,
    /// Attributes of the root element
    pub root_attributes: BTreeMap<String, String>,
    /// Number of record elements anywhere in the document
    pub record_count: usize,
    /// Index of the first record
    pub first_index: Option<u64>,
    /// Text of an `<error>` root element
    pub error_message: Option<String>,
}

impl BatchDocument {
    /// Look up an attribute of the root element
    pub fn root_attribute(&self, name: &str) -> Option<&str> {
        self.root_attributes.get(name).map(String::as_str)
    }

    /// True when the service answered with an error document
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Parses batch documents using the configured element and attribute names
#[derive(Clone, Debug, Default)]
pub struct DocumentParser {
    names: DocumentConfig,
}

impl DocumentParser {
    /// Create a parser for the given field names
    pub fn new(names: DocumentConfig) -> Self {
        Self { names }
    }

    /// Field names this parser looks for
    pub fn names(&self) -> &DocumentConfig {
        &self.names
    }

    /// Parse a complete document
    ///
    /// # Errors
    /// Returns [`Error::Document`] when the XML is not well formed, has no root
    /// element, or its first record lacks an integer index.
    pub fn parse(&self, content: &[u8]) -> Result<BatchDocument> {
        let mut reader = Reader::from_reader(content);
        let mut buf = Vec::new();
        let mut doc = BatchDocument::default();
        let mut seen_root = false;
        let mut depth = 0usize;
        let mut error_text = String::new();

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                Error::Document(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    if matches!(event, Event::Start(_)) {
                        depth += 1;
                    }
                    if !seen_root {
                        seen_root = true;
                        self.read_root(e, &mut doc)?;
                    }
                    if local_name(e) == self.names.record_element {
                        if doc.record_count == 0 {
                            doc.first_index = Some(self.read_index(e)?);
                        }
                        doc.record_count += 1;
                    }
                }
                Event::Text(ref t) if doc.root == ERROR_ROOT => {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::Document(format!("bad error text: {}", e)))?;
                    error_text.push_str(text.trim());
                }
                Event::End(_) => depth = depth.saturating_sub(1),
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !seen_root {
            return Err(Error::Document("document has no root element".to_string()));
        }
        if depth > 0 {
            return Err(Error::Document(format!(
                "document truncated with {} unclosed element(s)",
                depth
            )));
        }
        if doc.root == ERROR_ROOT {
            doc.error_message = Some(if error_text.is_empty() {
                "service returned an error document".to_string()
            } else {
                error_text
            });
        }
        Ok(doc)
    }

    /// Parse a fetch response into a [`Batch`], keeping the raw bytes as payload
    pub fn parse_batch(&self, payload: Vec<u8>) -> Result<Batch> {
        let doc = self.parse(&payload)?;
        if let Some(message) = doc.error_message {
            return Err(Error::Document(format!("service error: {}", message)));
        }
        let transaction_id = doc
            .root_attribute(&self.names.transaction_attribute)
            .map(str::to_string);
        Ok(Batch {
            first_index: doc.first_index,
            record_count: doc.record_count,
            transaction_id,
            payload,
        })
    }

    fn read_root(&self, e: &BytesStart<'_>, doc: &mut BatchDocument) -> Result<()> {
        doc.root = local_name(e);
        for attr in e.attributes() {
            let attr = attr.map_err(|e| Error::Document(format!("bad root attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| {
                    Error::Document(format!("bad value for root attribute {}: {}", key, e))
                })?
                .into_owned();
            doc.root_attributes.insert(key, value);
        }
        Ok(())
    }

    fn read_index(&self, e: &BytesStart<'_>) -> Result<u64> {
        let attr_name = self.names.index_attribute.as_str();
        let attr = e
            .try_get_attribute(attr_name)
            .map_err(|e| Error::Document(format!("bad record attribute: {}", e)))?
            .ok_or_else(|| {
                Error::Document(format!("first record has no '{}' attribute", attr_name))
            })?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Document(format!("bad '{}' value: {}", attr_name, e)))?;
        value.trim().parse::<u64>().map_err(|_| {
            Error::Document(format!(
                "first record '{}' is not an integer: {:?}",
                attr_name, value
            ))
        })
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<books transactionId="tx-42">
  <book indeks="501"><tytul>Pan Tadeusz</tytul><atrybuty><a n="x"/></atrybuty></book>
  <book indeks="502"><tytul>Lalka</tytul></book>
  <book indeks="503"/>
</books>"#;

    fn parser() -> DocumentParser {
        DocumentParser::new(DocumentConfig::default())
    }

    #[test]
    fn reads_count_first_index_and_transaction() {
        let doc = parser().parse(SAMPLE.as_bytes()).unwrap();

        assert_eq!(doc.root, "books");
        assert_eq!(doc.record_count, 3);
        assert_eq!(doc.first_index, Some(501));
        assert_eq!(doc.root_attribute("transactionId"), Some("tx-42"));
        assert!(!doc.is_error());
    }

    #[test]
    fn parse_batch_keeps_raw_payload() {
        let batch = parser().parse_batch(SAMPLE.as_bytes().to_vec()).unwrap();

        assert_eq!(batch.first_index, Some(501));
        assert_eq!(batch.record_count, 3);
        assert_eq!(batch.transaction_id.as_deref(), Some("tx-42"));
        assert_eq!(batch.payload, SAMPLE.as_bytes());
    }

    #[test]
    fn document_without_records_is_empty() {
        let batch = parser()
            .parse_batch(br#"<books transactionId="tx-0"></books>"#.to_vec())
            .unwrap();

        assert!(batch.is_empty());
        assert_eq!(batch.first_index, None);
    }

    #[test]
    fn error_root_is_reported() {
        let doc = parser()
            .parse(b"<error>Niepoprawny identyfikator klienta</error>")
            .unwrap();

        assert!(doc.is_error());
        assert_eq!(
            doc.error_message.as_deref(),
            Some("Niepoprawny identyfikator klienta")
        );

        let err = parser()
            .parse_batch(b"<error>session expired</error>".to_vec())
            .unwrap_err();
        assert!(err.to_string().contains("session expired"));
    }

    #[test]
    fn missing_index_on_first_record_is_an_error() {
        let result = parser().parse(b"<books><book><tytul>x</tytul></book></books>");

        assert!(matches!(result, Err(Error::Document(_))));
    }

    #[test]
    fn non_numeric_index_is_an_error() {
        let result = parser().parse(br#"<books><book indeks="abc"/></books>"#);

        assert!(matches!(result, Err(Error::Document(_))));
    }

    #[test]
    fn truncated_document_is_an_error() {
        let result = parser().parse(br#"<books><book indeks="1"><tytul>x</ty"#);

        assert!(result.is_err());
    }

    #[test]
    fn unclosed_root_is_truncation() {
        let result = parser().parse(br#"<books transactionId="t"><book indeks="1"/>"#);

        match result {
            Err(Error::Document(msg)) => assert!(msg.contains("truncated"), "got: {msg}"),
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_has_no_root() {
        let result = parser().parse(b"");

        assert!(matches!(result, Err(Error::Document(_))));
    }

    #[test]
    fn custom_names_are_honored() {
        let parser = DocumentParser::new(DocumentConfig {
            record_element: "item".to_string(),
            index_attribute: "id".to_string(),
            transaction_attribute: "tx".to_string(),
        });

        let batch = parser
            .parse_batch(br#"<feed tx="9"><item id="10"/><item id="11"/></feed>"#.to_vec())
            .unwrap();

        assert_eq!(batch.first_index, Some(10));
        assert_eq!(batch.record_count, 2);
        assert_eq!(batch.transaction_id.as_deref(), Some("9"));
    }
}
