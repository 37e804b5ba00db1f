//! Request, response and header value types

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Case-insensitive header map
///
/// Lookups ignore ASCII case. The most recently inserted spelling of a name
/// is kept for output, and iteration is ordered by lower-cased name so that
/// serialized cassettes are stable.
#[derive(Clone, Default)]
pub struct Headers {
    entries: BTreeMap<String, (String, String)>,
}

impl Headers {
    /// Create an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Insert or replace a header, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()))
            .map(|(_, previous)| previous)
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    /// Check whether a header is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The media type of the `Content-Type` header, without parameters
    #[must_use]
    pub fn mime_type(&self) -> Option<String> {
        self.get("Content-Type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()
        })
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((k1, (_, v1)), (k2, (_, v2)))| k1 == k2 && v1 == v2)
    }
}

impl Eq for Headers {}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    headers.insert(name, value);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// An outgoing HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// HTTP method (e.g., "GET", "POST")
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Option<Bytes>,
}

impl RequestRecord {
    /// Create a request without headers or body
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Shorthand for a `GET` request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response metadata returned by a transport or stored in a cassette
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    /// URL the response was served for
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Media type, if known
    pub mime_type: Option<String>,
}

impl ResponseRecord {
    /// Create a response without headers
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Headers::new(),
            mime_type: None,
        }
    }

    /// Add a header; setting `Content-Type` also fills in the mime type
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        if self.mime_type.is_none() {
            self.mime_type = self.headers.mime_type();
        }
        self
    }
}
