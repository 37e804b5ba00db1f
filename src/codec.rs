//! Content-type driven body codec
//!
//! Bodies are persisted as JSON values whose shape depends on the record's
//! `Content-Type`: text stays readable, JSON stays structured, and anything
//! else is stored as Base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cassette::Headers;
use crate::{Result, TapedeckError};

/// How a body was persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyFormat {
    /// Parsed JSON value
    #[serde(rename = "json")]
    Json,
    /// UTF-8 string
    #[serde(rename = "plain_text")]
    PlainText,
    /// Standard Base64 string
    #[default]
    #[serde(rename = "base64_string")]
    Base64String,
}

impl BodyFormat {
    /// Tag written to cassette files
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::PlainText => "plain_text",
            Self::Base64String => "base64_string",
        }
    }
}

impl std::fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A body in its persisted representation
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    /// Format tag written next to the body
    pub format: BodyFormat,
    /// The representation itself
    pub value: Value,
}

/// Encode raw body bytes according to the `Content-Type` in `headers`
///
/// Never fails: text that is not UTF-8 and JSON that does not parse both fall
/// back to Base64.
#[must_use]
pub fn encode(body: &[u8], headers: &Headers) -> EncodedBody {
    if let Some(content_type) = headers.get("Content-Type") {
        if content_type.starts_with("text/") {
            if let Ok(text) = std::str::from_utf8(body) {
                return EncodedBody {
                    format: BodyFormat::PlainText,
                    value: Value::String(text.to_string()),
                };
            }
        } else if content_type.starts_with("application/json") {
            if let Ok(json) = serde_json::from_slice::<Value>(body) {
                return EncodedBody {
                    format: BodyFormat::Json,
                    value: json,
                };
            }
        }
    }

    EncodedBody {
        format: BodyFormat::Base64String,
        value: Value::String(STANDARD.encode(body)),
    }
}

/// Decode a persisted body back to bytes
///
/// # Errors
///
/// Returns error if the value does not fit its format tag or is not valid
/// Base64
pub fn decode(encoded: &EncodedBody) -> Result<Bytes> {
    match (encoded.format, &encoded.value) {
        (BodyFormat::Json, value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        (BodyFormat::PlainText, Value::String(text)) => Ok(Bytes::from(text.clone().into_bytes())),
        (BodyFormat::Base64String, Value::String(text)) => STANDARD
            .decode(text)
            .map(Bytes::from)
            .map_err(|e| TapedeckError::InvalidFormat(format!("Invalid base64 body: {e}"))),
        (format, other) => Err(TapedeckError::InvalidFormat(format!(
            "Body tagged {format:?} must be a string, got {other}"
        ))),
    }
}

/// Decode a body read from a cassette file
///
/// A missing tag means Base64. Cassettes written before the tag existed may
/// hold raw text (decoded as UTF-8 when the record is `text/*`) or inline
/// JSON values.
///
/// # Errors
///
/// Returns error if the value cannot be decoded under any applicable format
pub fn decode_stored(value: Value, format: Option<BodyFormat>, headers: &Headers) -> Result<Bytes> {
    if let Some(format) = format {
        return decode(&EncodedBody { format, value });
    }

    match value {
        Value::String(text) => match STANDARD.decode(&text) {
            Ok(raw) => Ok(Bytes::from(raw)),
            Err(e) => {
                let is_text = headers
                    .get("Content-Type")
                    .is_some_and(|ct| ct.starts_with("text/"));
                if is_text {
                    Ok(Bytes::from(text.into_bytes()))
                } else {
                    Err(TapedeckError::InvalidFormat(format!(
                        "Untagged body is not valid base64: {e}"
                    )))
                }
            }
        },
        other => decode(&EncodedBody {
            format: BodyFormat::Json,
            value: other,
        }),
    }
}

/// Comparable form of a body
#[derive(Debug)]
enum Canonical<'a> {
    Json(Value),
    Text(&'a str),
    Raw(&'a [u8]),
}

fn canonical<'a>(body: &'a [u8], headers: &Headers) -> Canonical<'a> {
    match headers.get("Content-Type") {
        Some(ct) if ct.starts_with("text/") => match std::str::from_utf8(body) {
            Ok(text) => Canonical::Text(text),
            Err(_) => Canonical::Raw(body),
        },
        Some(ct) if ct.starts_with("application/json") => {
            match serde_json::from_slice::<Value>(body) {
                Ok(json) => Canonical::Json(json),
                Err(_) => Canonical::Raw(body),
            }
        }
        _ => Canonical::Raw(body),
    }
}

/// Compare two bodies after canonicalizing each with its own headers
///
/// JSON bodies compare structurally (object key order and whitespace are
/// ignored), text compares as strings, and everything else compares bytes.
#[must_use]
pub fn bodies_equal(
    a: Option<&[u8]>,
    a_headers: &Headers,
    b: Option<&[u8]>,
    b_headers: &Headers,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match (canonical(a, a_headers), canonical(b, b_headers)) {
            (Canonical::Json(x), Canonical::Json(y)) => x == y,
            (Canonical::Text(x), Canonical::Text(y)) => x == y,
            _ => a == b,
        },
        _ => false,
    }
}
