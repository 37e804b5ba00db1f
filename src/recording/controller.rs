//! Recording state machine and persistence barrier

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::cassette::{Cassette, InteractionRecord};
use crate::storage::CassetteWriter;

/// Callback fired once a recording batch has drained
pub type DoneCallback = Box<dyn FnOnce(RecordingSummary) + Send>;

/// What a finished batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSummary {
    /// Calls answered from the cassette
    pub played_back: usize,
    /// Calls recorded from the transport
    pub recorded: usize,
    /// Whether the cassette was written
    pub persisted: bool,
    /// Why writing the cassette failed, if it did
    pub persist_error: Option<String>,
}

/// The result one call contributes to its batch
#[derive(Debug, Clone)]
pub enum CompletedCall {
    /// Answered from an existing interaction
    Playback(InteractionRecord),
    /// New interaction to persist
    Recorded(InteractionRecord),
}

#[derive(Default)]
struct ControllerState {
    recording: bool,
    outstanding: usize,
    completed: Vec<CompletedCall>,
    on_done: Vec<DoneCallback>,
    cassette: Option<Arc<Cassette>>,
}

impl ControllerState {
    fn begin(&mut self) {
        if self.recording {
            return;
        }
        self.recording = true;
        // a batch still draining is joined, not reset
        if self.outstanding == 0 {
            self.completed.clear();
        }
    }

    fn is_drained(&self) -> bool {
        !self.recording && self.outstanding == 0
    }
}

/// Session-scoped recording state machine
///
/// Tracks outstanding calls between `begin_recording` and `end_recording`
/// and persists the cassette once the last of them completes.
pub struct RecordingController {
    name: String,
    writer: Arc<dyn CassetteWriter>,
    state: Mutex<ControllerState>,
}

impl RecordingController {
    /// Create a controller for a cassette that may or may not exist yet
    #[must_use]
    pub fn new(name: impl Into<String>, cassette: Option<Cassette>, writer: Arc<dyn CassetteWriter>) -> Self {
        Self {
            name: name.into(),
            writer,
            state: Mutex::new(ControllerState {
                cassette: cassette.map(Arc::new),
                ..ControllerState::default()
            }),
        }
    }

    /// Cassette name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cassette as currently known (including persisted recordings)
    pub async fn cassette(&self) -> Option<Arc<Cassette>> {
        self.state.lock().await.cassette.clone()
    }

    /// Whether an explicit or implicit batch is open
    pub async fn is_recording(&self) -> bool {
        self.state.lock().await.recording
    }

    /// Number of calls started but not finished
    pub async fn outstanding(&self) -> usize {
        self.state.lock().await.outstanding
    }

    /// Open a batch; no-op if one is already open
    pub async fn begin_recording(&self) {
        self.state.lock().await.begin();
    }

    /// Close the batch and register `on_done`
    ///
    /// `on_done` fires immediately when nothing is outstanding, otherwise
    /// after the last outstanding call finishes.
    pub async fn end_recording(&self, on_done: DoneCallback) {
        let mut state = self.state.lock().await;
        state.recording = false;
        state.on_done.push(on_done);

        if state.outstanding == 0 {
            let (callbacks, summary) = self.finish_batch(&mut state);
            drop(state);
            fire(callbacks, &summary);
        }
    }

    /// Register a new call, wrapping it in an implicit batch when none is open
    pub async fn start_call(&self) {
        let mut state = self.state.lock().await;
        let implicit = !state.recording;
        if implicit {
            state.begin();
        }
        state.outstanding += 1;
        if implicit {
            state.recording = false;
        }
    }

    /// Report a call as finished
    ///
    /// `completed` is `None` for calls that contribute nothing (faults,
    /// transport errors, discarded responses).
    pub async fn finish_call(&self, completed: Option<CompletedCall>) {
        let mut state = self.state.lock().await;
        state.outstanding = state.outstanding.saturating_sub(1);
        if let Some(completed) = completed {
            state.completed.push(completed);
        }

        if state.is_drained() {
            let (callbacks, summary) = self.finish_batch(&mut state);
            drop(state);
            fire(callbacks, &summary);
        }
    }

    fn finish_batch(&self, state: &mut ControllerState) -> (Vec<DoneCallback>, RecordingSummary) {
        let completed = std::mem::take(&mut state.completed);
        let mut summary = RecordingSummary::default();
        let mut recorded = Vec::new();
        for call in completed {
            match call {
                CompletedCall::Playback(_) => summary.played_back += 1,
                CompletedCall::Recorded(interaction) => recorded.push(interaction),
            }
        }
        summary.recorded = recorded.len();

        if !recorded.is_empty() {
            let cassette = match &state.cassette {
                Some(existing) => existing.appending(recorded),
                None => Cassette::new(self.name.clone(), recorded),
            };

            match self.persist(&cassette) {
                Ok(()) => {
                    info!(
                        "Persisted cassette '{}' ({} interactions, {} new)",
                        self.name,
                        cassette.len(),
                        summary.recorded
                    );
                    summary.persisted = true;
                    state.cassette = Some(Arc::new(cassette));
                }
                Err(e) => {
                    error!("Failed to persist cassette '{}': {}", self.name, e);
                    summary.persist_error = Some(e.to_string());
                }
            }
        } else {
            debug!(
                "Recording batch for '{}' finished without new interactions",
                self.name
            );
        }

        (std::mem::take(&mut state.on_done), summary)
    }

    fn persist(&self, cassette: &Cassette) -> crate::Result<()> {
        let data = cassette.to_vec()?;
        self.writer.persist(&self.name, &data)
    }
}

fn fire(callbacks: Vec<DoneCallback>, summary: &RecordingSummary) {
    for callback in callbacks {
        callback(summary.clone());
    }
}
