//! Per-call dispatch: filter, match or record, notify, complete

mod download;
mod notify;

pub use download::DownloadOutcome;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use self::notify::Notifier;
use crate::cassette::{Cassette, Headers, InteractionRecord, MatchPolicy, RequestRecord, ResponseRecord};
use crate::config::SessionConfig;
use crate::filter::Filter;
use crate::recording::{
    decide, CompletedCall, Decision, RecordMode, RecordingController, RecordingSummary,
};
use crate::storage::{validate_cassette_name, CassetteWriter, DirectoryStore, ResourceLoader};
use crate::transport::{Transport, TransportError};
use crate::{Result, TapedeckError};

/// Identifier of one dispatched call, unique within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Raw value
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What a call's completion receives
#[derive(Debug, Clone, Default)]
pub struct CallOutcome {
    /// Response body
    pub body: Option<Bytes>,
    /// Response metadata
    pub response: Option<ResponseRecord>,
    /// Transport failure, if any
    pub error: Option<TransportError>,
}

/// Completion handler for [`Session::dispatch`]
pub type Completion = Box<dyn FnOnce(CallOutcome) + Send>;

/// How a session is set up
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Cassette name
    pub name: String,
    /// Record mode
    pub mode: RecordMode,
    /// Whether live calls may be made
    pub recording_enabled: bool,
    /// Matching options
    pub policy: MatchPolicy,
    /// Redaction applied before matching and persistence
    pub filter: Filter,
    /// Headers merged into every request
    pub additional_headers: Headers,
}

impl SessionOptions {
    /// Options with the default mode and recording enabled
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: RecordMode::default(),
            recording_enabled: true,
            policy: MatchPolicy::default(),
            filter: Filter::default(),
            additional_headers: Headers::new(),
        }
    }

    /// Set the record mode
    #[must_use]
    pub fn mode(mut self, mode: RecordMode) -> Self {
        self.mode = mode;
        self
    }

    /// Allow or forbid live calls
    #[must_use]
    pub fn recording_enabled(mut self, enabled: bool) -> Self {
        self.recording_enabled = enabled;
        self
    }

    /// Set the matching policy
    #[must_use]
    pub fn policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the redaction filter
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Add a header merged into every request
    #[must_use]
    pub fn additional_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(name, value);
        self
    }
}

struct SessionInner {
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    controller: RecordingController,
    notifier: Notifier,
    next_task: AtomicU64,
    /// Whether a fixture existed when the session was created; recording
    /// during the session never changes it
    cassette_present: bool,
}

/// A recording/playback session bound to one cassette
///
/// Cheap to clone; clones share the cassette, the recording state and the
/// task counter.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.options.name)
            .field("mode", &self.inner.options.mode)
            .field("recording_enabled", &self.inner.options.recording_enabled)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session, loading its cassette from `storage`
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid, the mode conflicts with
    /// disabled recording, or an existing cassette cannot be read
    pub fn new<S>(options: SessionOptions, storage: Arc<S>, transport: Arc<dyn Transport>) -> Result<Self>
    where
        S: ResourceLoader + CassetteWriter + 'static,
    {
        validate_cassette_name(&options.name)?;
        if options.mode == RecordMode::All && !options.recording_enabled {
            return Err(TapedeckError::ConflictingRecordMode);
        }

        let cassette = match storage.load(&options.name)? {
            Some(data) => {
                let cassette = Cassette::from_slice(&data)?;
                info!(
                    "Loaded cassette '{}' with {} interactions",
                    options.name,
                    cassette.len()
                );
                Some(cassette)
            }
            None => {
                info!("No cassette named '{}' yet", options.name);
                None
            }
        };

        let cassette_present = cassette.is_some();
        let writer: Arc<dyn CassetteWriter> = storage;
        let controller = RecordingController::new(options.name.clone(), cassette, writer);

        Ok(Self {
            inner: Arc::new(SessionInner {
                options,
                transport,
                controller,
                notifier: Notifier::spawn()?,
                next_task: AtomicU64::new(1),
                cassette_present,
            }),
        })
    }

    /// Build a directory-backed session from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the cassette
    /// cannot be read
    pub fn from_config(config: &SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(DirectoryStore::with_output_dir(
            &config.cassette_dir,
            config.output_dir(),
        ));
        Self::new(config.session_options(), store, transport)
    }

    /// Cassette name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Record mode
    #[must_use]
    pub fn mode(&self) -> RecordMode {
        self.inner.options.mode
    }

    /// The cassette as currently known, including persisted recordings
    pub async fn cassette(&self) -> Option<Arc<Cassette>> {
        self.inner.controller.cassette().await
    }

    /// Open an explicit recording batch
    pub async fn begin_recording(&self) {
        self.inner.controller.begin_recording().await;
    }

    /// Close the batch; `on_done` runs once every call in it has finished
    pub async fn end_recording<F>(&self, on_done: F)
    where
        F: FnOnce(RecordingSummary) + Send + 'static,
    {
        self.inner.controller.end_recording(Box::new(on_done)).await;
    }

    /// Close the batch and wait for it to drain
    ///
    /// # Errors
    ///
    /// Returns error if the batch's completion was dropped without firing
    pub async fn end_recording_and_wait(&self) -> Result<RecordingSummary> {
        let (tx, rx) = oneshot::channel();
        self.end_recording(move |summary| {
            let _ = tx.send(summary);
        })
        .await;

        rx.await
            .map_err(|_| TapedeckError::Other("Recording batch finished without a summary".to_string()))
    }

    /// Perform one call
    ///
    /// `completion` runs exactly once on every path that returns `Ok`, and
    /// never when a configuration fault is returned.
    ///
    /// # Errors
    ///
    /// Returns the configuration fault that stopped the call
    pub async fn dispatch<F>(&self, request: RequestRecord, completion: F) -> Result<TaskId>
    where
        F: FnOnce(CallOutcome) + Send + 'static,
    {
        let inner = &self.inner;
        let task = TaskId(inner.next_task.fetch_add(1, Ordering::Relaxed));
        let request = self.with_additional_headers(request);

        inner.controller.start_call().await;
        match self.run_call(task, request, Box::new(completion)).await {
            Ok(completed) => {
                inner.controller.finish_call(completed).await;
                Ok(task)
            }
            Err(e) => {
                error!("{} in cassette '{}' failed: {}", task, inner.options.name, e);
                inner.controller.finish_call(None).await;
                Err(e)
            }
        }
    }

    /// Perform one call and wait for its outcome
    ///
    /// # Errors
    ///
    /// Returns the configuration fault that stopped the call
    pub async fn send(&self, request: RequestRecord) -> Result<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(request, move |outcome| {
            let _ = tx.send(outcome);
        })
        .await?;

        rx.await
            .map_err(|_| TapedeckError::Other("Call finished without an outcome".to_string()))
    }

    /// Send `request` with `body` attached
    ///
    /// # Errors
    ///
    /// Returns the configuration fault that stopped the call
    pub async fn upload(&self, request: RequestRecord, body: impl Into<Bytes>) -> Result<CallOutcome> {
        self.send(request.with_body(body)).await
    }

    /// Send `request` and write the response body to a temporary file
    ///
    /// # Errors
    ///
    /// Returns the configuration fault that stopped the call, or an I/O
    /// error if the body cannot be written
    pub async fn download(&self, request: RequestRecord) -> Result<DownloadOutcome> {
        let outcome = self.send(request).await?;
        DownloadOutcome::from_call(outcome).await
    }

    fn with_additional_headers(&self, mut request: RequestRecord) -> RequestRecord {
        for (name, value) in self.inner.options.additional_headers.iter() {
            if !request.headers.contains(name) {
                request.headers.insert(name, value);
            }
        }
        request
    }

    async fn run_call(
        &self,
        task: TaskId,
        request: RequestRecord,
        completion: Completion,
    ) -> Result<Option<CompletedCall>> {
        let inner = &self.inner;
        let options = &inner.options;
        let filtered = options.filter.filter_request(request.clone());

        let cassette = inner.controller.cassette().await;
        let matched = if options.mode.plays_back() {
            cassette
                .as_deref()
                .and_then(|c| c.interaction_for(&filtered, &options.policy))
                .cloned()
        } else {
            None
        };

        let decision = decide(
            options.mode,
            &options.name,
            inner.cassette_present,
            matched,
            options.recording_enabled,
            (filtered.method.as_str(), filtered.url.as_str()),
        )?;

        match decision {
            Decision::Playback(interaction) => {
                debug!("{} playing back {} {}", task, filtered.method, filtered.url);
                let outcome = CallOutcome {
                    body: interaction.response_body.clone(),
                    response: Some(interaction.response.clone()),
                    error: None,
                };
                inner.notifier.deliver(move || completion(outcome)).await;
                Ok(Some(CompletedCall::Playback(interaction)))
            }
            Decision::Record => {
                debug!("{} recording {} {}", task, filtered.method, filtered.url);
                let live = inner.transport.execute(&request).await;

                let Some(response) = live.response else {
                    let Some(error) = live.error else {
                        return Err(TapedeckError::MissingResponse);
                    };
                    warn!("{} failed without a response: {}", task, error);
                    let outcome = CallOutcome {
                        body: live.body,
                        response: None,
                        error: Some(error),
                    };
                    inner.notifier.deliver(move || completion(outcome)).await;
                    return Ok(None);
                };

                let outcome = CallOutcome {
                    body: live.body.clone(),
                    response: Some(response.clone()),
                    error: live.error,
                };
                inner.notifier.deliver(move || completion(outcome)).await;

                match options.filter.filter_response(response, live.body) {
                    Some((response, body)) => Ok(Some(CompletedCall::Recorded(
                        InteractionRecord::new(filtered, response, body),
                    ))),
                    None => {
                        warn!("{} response discarded by filter, not recording", task);
                        Ok(None)
                    }
                }
            }
        }
    }
}
