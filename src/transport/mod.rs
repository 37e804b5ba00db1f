//! Live HTTP collaborators

mod http;

pub use http::HttpTransport;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

use crate::cassette::{RequestRecord, ResponseRecord};

/// Boxed future returned by [`Transport::execute`], keeping the trait dyn-compatible
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = TransportResponse> + Send + 'a>>;

/// Failure reported by a transport
///
/// Delivered to callers in the completion's error slot, never recorded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Human-readable description
    pub message: String,
}

impl TransportError {
    /// Create an error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Everything a live call produced
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// Response body
    pub body: Option<Bytes>,
    /// Response metadata, absent when the call failed before a response
    pub response: Option<ResponseRecord>,
    /// Failure, if any
    pub error: Option<TransportError>,
}

impl TransportResponse {
    /// A completed exchange
    #[must_use]
    pub fn ok(response: ResponseRecord, body: Option<Bytes>) -> Self {
        Self {
            body,
            response: Some(response),
            error: None,
        }
    }

    /// A call that failed without a response
    #[must_use]
    pub fn failed(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Performs real HTTP calls on behalf of a recording session
pub trait Transport: Send + Sync {
    /// Execute `request` against the network
    fn execute<'a>(&'a self, request: &'a RequestRecord) -> TransportFuture<'a>;
}
