//! Data models for the Tracklog audit pipeline.
//!
//! This module contains the tracked event, its persisted form, the response
//! envelope contract and the word service bodies.

pub mod envelope;
pub mod event;
pub mod record;
pub mod words;

pub use envelope::{codes, ErrorStatus, ResponseEnvelope};
pub use event::{Payload, Severity, TrackedEvent, UnknownSeverity};
pub use record::{tokenize, PersistedRecord};
pub use words::{
    ReverseSentenceRequest, ReverseSentenceResponse, SearchWordRequest, SearchWordResponse,
    WordRecord,
};
