//! Cassette data model, file format and request matching

mod format;
mod matching;
mod record;

pub use matching::MatchPolicy;
pub use record::{Headers, RequestRecord, ResponseRecord};

use std::time::SystemTime;

use bytes::Bytes;

/// One recorded request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRecord {
    /// The (filtered) request
    pub request: RequestRecord,
    /// The (filtered) response metadata
    pub response: ResponseRecord,
    /// The response body
    pub response_body: Option<Bytes>,
    /// When the exchange was recorded
    pub recorded_at: SystemTime,
}

impl InteractionRecord {
    /// Create an interaction stamped with the current time
    #[must_use]
    pub fn new(request: RequestRecord, response: ResponseRecord, response_body: Option<Bytes>) -> Self {
        Self {
            request,
            response,
            response_body,
            recorded_at: SystemTime::now(),
        }
    }
}

/// A named, ordered collection of interactions
///
/// Order is significant: matching returns the first suitable interaction and
/// files are written in this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cassette {
    /// Cassette name
    pub name: String,
    /// Interactions in insertion order
    pub interactions: Vec<InteractionRecord>,
}

impl Cassette {
    /// Create a cassette
    pub fn new(name: impl Into<String>, interactions: Vec<InteractionRecord>) -> Self {
        Self {
            name: name.into(),
            interactions,
        }
    }

    /// A new cassette holding these interactions followed by `recorded`
    #[must_use]
    pub fn appending(&self, recorded: impl IntoIterator<Item = InteractionRecord>) -> Self {
        let mut interactions = self.interactions.clone();
        interactions.extend(recorded);
        Self::new(self.name.clone(), interactions)
    }

    /// Number of interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the cassette has no interactions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }
}
