//! Cassette file format
//!
//! Cassettes are pretty-printed JSON documents terminated by a single newline:
//!
//! ```text
//! { "name": ..., "interactions": [ { "request": {...}, "response": {...}, "recorded_at": 1700000000 } ] }
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use super::record::{Headers, RequestRecord, ResponseRecord};
use super::{Cassette, InteractionRecord};
use crate::codec::{self, BodyFormat};
use crate::{Result, TapedeckError};

#[derive(Serialize)]
struct CassetteOut<'a> {
    name: &'a str,
    interactions: Vec<InteractionFile>,
}

#[derive(Deserialize)]
struct CassetteIn {
    name: String,
    #[serde(default)]
    interactions: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct InteractionFile {
    request: RequestFile,
    response: ResponseFile,
    recorded_at: serde_json::Number,
}

#[derive(Serialize, Deserialize)]
struct RequestFile {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: Headers,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_format: Option<BodyFormat>,
}

#[derive(Serialize, Deserialize)]
struct ResponseFile {
    url: String,
    status: u16,
    #[serde(default)]
    headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_format: Option<BodyFormat>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Keep an explicit `null` body; only a missing key means "no body"
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Encode an optional body into its `(body, body_format)` pair
fn encode_body(body: Option<&Bytes>, headers: &Headers) -> (Option<Value>, Option<BodyFormat>) {
    match body {
        Some(body) => {
            let encoded = codec::encode(body, headers);
            (Some(encoded.value), Some(encoded.format))
        }
        None => (None, None),
    }
}

fn decode_body(
    body: Option<Value>,
    format: Option<BodyFormat>,
    headers: &Headers,
) -> Result<Option<Bytes>> {
    match (body, format) {
        // untagged null predates the format tag and meant "no body"
        (None, _) | (Some(Value::Null), None) => Ok(None),
        (Some(value), format) => codec::decode_stored(value, format, headers).map(Some),
    }
}

fn to_epoch_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn from_epoch_seconds(number: &serde_json::Number) -> Result<SystemTime> {
    let secs = number
        .as_u64()
        .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .ok_or_else(|| {
            TapedeckError::InvalidFormat(format!("Invalid recorded_at timestamp: {number}"))
        })?;
    UNIX_EPOCH
        .checked_add(Duration::from_secs(secs))
        .ok_or_else(|| TapedeckError::InvalidFormat(format!("recorded_at out of range: {number}")))
}

impl InteractionFile {
    fn from_record(interaction: &InteractionRecord) -> Self {
        let request = &interaction.request;
        let (request_body, request_format) = encode_body(request.body.as_ref(), &request.headers);

        let response = &interaction.response;
        let (response_body, response_format) =
            encode_body(interaction.response_body.as_ref(), &response.headers);

        Self {
            request: RequestFile {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request_body,
                body_format: request_format,
            },
            response: ResponseFile {
                url: response.url.clone(),
                status: response.status,
                headers: response.headers.clone(),
                mime_type: response.mime_type.clone(),
                body: response_body,
                body_format: response_format,
            },
            recorded_at: to_epoch_seconds(interaction.recorded_at).into(),
        }
    }

    fn into_record(self) -> Result<InteractionRecord> {
        let request_body = decode_body(
            self.request.body,
            self.request.body_format,
            &self.request.headers,
        )?;
        let response_body = decode_body(
            self.response.body,
            self.response.body_format,
            &self.response.headers,
        )?;
        let mime_type = self
            .response
            .mime_type
            .or_else(|| self.response.headers.mime_type());

        Ok(InteractionRecord {
            request: RequestRecord {
                method: self.request.method,
                url: self.request.url,
                headers: self.request.headers,
                body: request_body,
            },
            response: ResponseRecord {
                url: self.response.url,
                status: self.response.status,
                headers: self.response.headers,
                mime_type,
            },
            response_body,
            recorded_at: from_epoch_seconds(&self.recorded_at)?,
        })
    }
}

impl Cassette {
    /// Parse a cassette from its file bytes
    ///
    /// Interactions that fail to parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not JSON or has no `name`
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let raw: CassetteIn = serde_json::from_slice(data)
            .map_err(|e| TapedeckError::InvalidFormat(format!("Failed to parse cassette: {e}")))?;

        let mut interactions = Vec::with_capacity(raw.interactions.len());
        for (index, value) in raw.interactions.into_iter().enumerate() {
            let parsed = serde_json::from_value::<InteractionFile>(value)
                .map_err(TapedeckError::from)
                .and_then(InteractionFile::into_record);
            match parsed {
                Ok(interaction) => interactions.push(interaction),
                Err(e) => warn!(
                    "Skipping interaction {} in cassette '{}': {}",
                    index, raw.name, e
                ),
            }
        }

        Ok(Self::new(raw.name, interactions))
    }

    /// Serialize the cassette to pretty-printed JSON with a trailing newline
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let out = CassetteOut {
            name: &self.name,
            interactions: self
                .interactions
                .iter()
                .map(InteractionFile::from_record)
                .collect(),
        };
        let mut data = serde_json::to_vec_pretty(&out)?;
        data.push(b'\n');
        Ok(data)
    }
}
