//! Response envelope model.
//!
//! Every inbound operation answers with an envelope exposing a list of coded
//! errors. Capture reads that list to classify a call.

use serde::{Deserialize, Serialize};

use super::event::Payload;

/// Well-known error codes reported in response envelopes.
pub mod codes {
    /// The caller certificate was rejected.
    pub const INVALID_CERT: &str = "1001";
    /// The request payload failed validation.
    pub const REQUEST_VALIDATION: &str = "1002";
    /// An unexpected internal failure.
    pub const INTERNAL_ERROR: &str = "1003";
    /// The sentence to reverse was blank.
    pub const BLANK_SENTENCE: &str = "1005";
    /// Search criteria were insufficient.
    pub const INVALID_CRITERIA: &str = "1006";
    /// A valid search matched nothing.
    pub const EMPTY_RESULT: &str = "1007";
    /// A stored payload could not be converted to its typed shape.
    pub const RESULT_CONVERSION: &str = "1008";
}

/// A single coded failure reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStatus {
    /// Stable error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl ErrorStatus {
    /// Creates a new error status.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The result envelope of an inbound operation.
///
/// Implementors expose the error list used to derive severity and the
/// logical response body that is recorded in the audit event.
pub trait ResponseEnvelope {
    /// Errors reported by the operation. Empty on success.
    fn errors(&self) -> &[ErrorStatus];

    /// The logical response body to record.
    fn body(&self) -> Payload;
}
