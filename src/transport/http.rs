//! Plain-HTTP transport over hyper

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use super::{Transport, TransportError, TransportFuture, TransportResponse};
use crate::cassette::{Headers, RequestRecord, ResponseRecord};

/// Default backing transport for live recording
///
/// Speaks HTTP/1.1 without TLS; `https` URLs fail with a transport error.
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpTransport {
    /// Create a transport with a pooled client
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self { client }
    }

    async fn send(&self, request: &RequestRecord) -> Result<(ResponseRecord, Bytes), TransportError> {
        let uri = parse_uri(&request.url)?;
        debug!("Sending {} {}", request.method, uri);

        let method = request
            .method
            .parse::<Method>()
            .map_err(|e| TransportError::new(format!("Invalid HTTP method '{}': {e}", request.method)))?;

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let body = request.body.clone().unwrap_or_default();
        let http_request = builder
            .body(Full::new(body))
            .map_err(|e| TransportError::new(format!("Failed to build request: {e}")))?;

        let response = self.client.request(http_request).await.map_err(|e| {
            warn!("Request to {} failed: {e}", request.url);
            TransportError::new(format!("Request failed: {e}"))
        })?;

        let status = response.status().as_u16();
        let headers = headers_from(response.headers());

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::new(format!("Failed to read response body: {e}")))?
            .to_bytes();

        let mut record = ResponseRecord::new(request.url.clone(), status);
        record.mime_type = headers.mime_type();
        record.headers = headers;

        Ok((record, body))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(&'a self, request: &'a RequestRecord) -> TransportFuture<'a> {
        Box::pin(async move {
            match self.send(request).await {
                Ok((response, body)) => TransportResponse::ok(response, Some(body)),
                Err(error) => TransportResponse::failed(error),
            }
        })
    }
}

/// Convert hyper headers, keeping non-UTF-8 values as lossy text
fn headers_from(map: &HeaderMap) -> Headers {
    map.iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn parse_uri(url: &str) -> Result<Uri, TransportError> {
    let uri = url
        .parse::<Uri>()
        .map_err(|e| TransportError::new(format!("Invalid URI '{url}': {e}")))?;

    match uri.scheme_str() {
        Some("http") => Ok(uri),
        Some(other) => Err(TransportError::new(format!(
            "Unsupported scheme '{other}' (only plain http is supported)"
        ))),
        None => Err(TransportError::new(format!("URI '{url}' has no scheme"))),
    }
}
