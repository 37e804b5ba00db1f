//! Record-mode policy and the recording state machine

mod controller;

pub use controller::{CompletedCall, DoneCallback, RecordingController, RecordingSummary};

use serde::{Deserialize, Serialize};

use crate::cassette::InteractionRecord;
use crate::{Result, TapedeckError};

/// Whether a playback miss records a new interaction or fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Playback only; a missing cassette is fatal
    None,
    /// Record only when no cassette exists
    #[default]
    Once,
    /// Play back known requests, record unknown ones
    NewEpisodes,
    /// Always record, ignoring existing interactions
    All,
}

impl RecordMode {
    /// Whether existing interactions are consulted at all
    #[must_use]
    pub fn plays_back(&self) -> bool {
        !matches!(self, RecordMode::All)
    }
}

/// What to do with a dispatched call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer from the matched interaction
    Playback(InteractionRecord),
    /// Perform the live call and record it
    Record,
}

/// Decide how to answer a call
///
/// `matched` is the cassette's match for the filtered request (always `None`
/// under [`RecordMode::All`]).
///
/// # Errors
///
/// Returns a configuration fault when the call can be neither played back
/// nor recorded
pub fn decide(
    mode: RecordMode,
    cassette_name: &str,
    cassette_present: bool,
    matched: Option<InteractionRecord>,
    recording_enabled: bool,
    request: (&str, &str),
) -> Result<Decision> {
    if mode == RecordMode::All {
        return if recording_enabled {
            Ok(Decision::Record)
        } else {
            Err(TapedeckError::ConflictingRecordMode)
        };
    }

    if let Some(interaction) = matched {
        return Ok(Decision::Playback(interaction));
    }

    if cassette_present && mode != RecordMode::NewEpisodes {
        let (method, url) = request;
        return Err(TapedeckError::RequestNotFound {
            method: method.to_string(),
            url: url.to_string(),
        });
    }

    if !cassette_present && mode == RecordMode::None {
        return Err(TapedeckError::NoRecording {
            cassette: cassette_name.to_string(),
        });
    }

    if !recording_enabled {
        return Err(TapedeckError::RecordingDisabled);
    }

    Ok(Decision::Record)
}
