//! The relayed event record.
//!
//! An [`Envelope`] is built once per ingress request and travels to every
//! subscriber as a single JSON text object:
//!
//! ```json
//! {"method":"GET","path":"/x","headers":{},"query":{},"body":""}
//! ```
//!
//! All five keys are always written, and decoding rejects a payload that
//! omits any of them, so an empty map never turns into a missing field.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors from encoding or decoding an envelope.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The envelope could not be written as JSON.
    #[error("envelope encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// The payload was not a complete envelope object.
    #[error("envelope decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// One relayed HTTP event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    method: String,
    path: String,
    #[serde(deserialize_with = "deserialize_headers")]
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    body: String,
}

impl Envelope {
    /// Start an envelope with no headers, no query and an empty body.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: String::new(),
        }
    }

    /// Add a header. A name that matches an existing one case-insensitively
    /// replaces it, keeping the newer spelling.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        insert_header(&mut self.headers, name.into(), value.into());
        self
    }

    /// Add a query parameter; a repeated key keeps the last value.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Set the body text.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// HTTP method of the relayed request.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All query parameters.
    #[must_use]
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Body text, possibly empty.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// Header names that differ only in case collapse to the last one in
    /// document order, as with [`Envelope::with_header`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the text is not a JSON object
    /// carrying exactly the five envelope fields.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(EnvelopeError::Decode)
    }
}

fn insert_header(headers: &mut BTreeMap<String, String>, name: String, value: String) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
    headers.insert(name, value);
}

fn deserialize_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct HeaderVisitor;

    impl<'de> Visitor<'de> for HeaderVisitor {
        type Value = BTreeMap<String, String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of header names to string values")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut headers = BTreeMap::new();
            while let Some((name, value)) = access.next_entry::<String, String>()? {
                insert_header(&mut headers, name, value);
            }
            Ok(headers)
        }
    }

    deserializer.deserialize_map(HeaderVisitor)
}
