//! Download calls: the body lands in a temporary file

use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use super::CallOutcome;
use crate::cassette::ResponseRecord;
use crate::transport::TransportError;
use crate::Result;

/// Result of [`Session::download`](super::Session::download)
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// File holding the response body, when there was one
    pub location: Option<PathBuf>,
    /// Response metadata
    pub response: Option<ResponseRecord>,
    /// Transport failure, if any
    pub error: Option<TransportError>,
}

impl DownloadOutcome {
    pub(super) async fn from_call(outcome: CallOutcome) -> Result<Self> {
        let location = match outcome.body {
            Some(body) => {
                let path = std::env::temp_dir().join(Uuid::new_v4().to_string());
                tokio::fs::write(&path, &body).await?;
                debug!("Wrote {} byte download to {}", body.len(), path.display());
                Some(path)
            }
            None => None,
        };

        Ok(Self {
            location,
            response: outcome.response,
            error: outcome.error,
        })
    }
}
