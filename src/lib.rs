//! Tapedeck - HTTP interaction recorder and replayer
//!
//! Intercepted calls are answered from a recorded cassette when possible and
//! captured from a live [`Transport`](transport::Transport) otherwise, with
//! redaction applied before anything is persisted.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod cassette;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod recording;
pub mod session;
pub mod storage;
pub mod transport;

pub use cassette::{Cassette, Headers, InteractionRecord, MatchPolicy, RequestRecord, ResponseRecord};
pub use error::{Result, TapedeckError};
pub use filter::{Filter, FilterRule};
pub use recording::{RecordMode, RecordingSummary};
pub use session::{CallOutcome, Session, SessionOptions, TaskId};
