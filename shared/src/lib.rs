//! Tracklog Shared Library
//!
//! This crate contains the audit pipeline used by the Tracklog services:
//! instrumented calls are captured as events, published on an event channel,
//! persisted by a consumer and searched by word and severity.
//!
//! # Modules
//!
//! - [`models`] - Event, record and envelope data models
//! - [`capture`] - Event capture around inbound operations
//! - [`channel`] - Publish/subscribe transport and the event publisher
//! - [`consumer`] - Persistence consumer writing events to the record store
//! - [`search`] - Criteria validation and record search
//! - [`storage`] - Record store traits and implementations
//! - [`config`] - Pipeline configuration
//!
//! # Example
//!
//! ```
//! use shared::models::{ErrorStatus, Severity};
//!
//! let errors = vec![ErrorStatus::new("1005", "Sentence cannot be blank")];
//! assert_eq!(Severity::from_errors(&errors), Severity::Error);
//! assert_eq!(Severity::from_errors(&[]), Severity::Info);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod capture;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod models;
pub mod search;
pub mod storage;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
