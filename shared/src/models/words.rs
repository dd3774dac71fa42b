//! Request and response bodies of the word service operations.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::envelope::{ErrorStatus, ResponseEnvelope};
use super::event::Payload;

/// Request body of the reverse operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ReverseSentenceRequest {
    /// The sentence whose words are reversed.
    #[serde(default)]
    #[validate(length(max = 10000, message = "Sentence exceeds 10000 characters"))]
    pub sentence: String,
}

/// Response body of the reverse operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseSentenceResponse {
    /// The sentence with every word reversed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversed_sentence: Option<String>,

    /// Errors reported by the operation.
    #[serde(default)]
    pub errors: Vec<ErrorStatus>,
}

impl ResponseEnvelope for ReverseSentenceResponse {
    fn errors(&self) -> &[ErrorStatus] {
        &self.errors
    }

    fn body(&self) -> Payload {
        Payload::from_serializable(self)
    }
}

/// Request body of the audit search operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SearchWordRequest {
    /// Free-text term matched against recorded requests and responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 256, message = "Word exceeds 256 characters"))]
    pub word: Option<String>,

    /// Return records without requiring a word.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_records: Option<bool>,

    /// Exact severity filter (`INFO` or `ERROR`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// A search hit reconstructed into the reverse operation's typed bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordRecord {
    /// The searched word, when one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,

    /// Identifier of the matching audit record.
    #[serde(default)]
    pub unique_id: String,

    /// Operation that produced the record.
    #[serde(default)]
    pub service_name: String,

    /// Recorded severity.
    #[serde(default)]
    pub severity: String,

    /// Recorded request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ReverseSentenceRequest>,

    /// Recorded response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ReverseSentenceResponse>,
}

/// Response body of the audit search operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWordResponse {
    /// Matching records, most relevant first.
    #[serde(default)]
    pub records: Vec<WordRecord>,

    /// Errors reported by the operation.
    #[serde(default)]
    pub errors: Vec<ErrorStatus>,
}

impl ResponseEnvelope for SearchWordResponse {
    fn errors(&self) -> &[ErrorStatus] {
        &self.errors
    }

    fn body(&self) -> Payload {
        Payload::from_serializable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::codes;
    use serde_json::json;

    #[test]
    fn test_reverse_request_defaults() {
        let request: ReverseSentenceRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.sentence, "");
    }

    #[test]
    fn test_reverse_request_ignores_unknown_fields() {
        let request: ReverseSentenceRequest =
            serde_json::from_value(json!({"sentence": "abc", "extra": 1})).unwrap();
        assert_eq!(request.sentence, "abc");
    }

    #[test]
    fn test_reverse_request_validation() {
        let ok = ReverseSentenceRequest {
            sentence: "short".to_string(),
        };
        assert!(ok.validate().is_ok());

        let too_long = ReverseSentenceRequest {
            sentence: "x".repeat(10_001),
        };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_search_request_validation() {
        let request = SearchWordRequest {
            word: Some("w".repeat(257)),
            ..SearchWordRequest::default()
        };
        assert!(request.validate().is_err());
        assert!(SearchWordRequest::default().validate().is_ok());
    }

    #[test]
    fn test_response_envelope_errors() {
        let response = ReverseSentenceResponse {
            reversed_sentence: None,
            errors: vec![ErrorStatus::new(codes::BLANK_SENTENCE, "blank")],
        };

        assert_eq!(ResponseEnvelope::errors(&response).len(), 1);
        assert_eq!(
            response.body().as_value().unwrap()["errors"][0]["code"],
            "1005"
        );
    }

    #[test]
    fn test_reverse_response_omits_missing_sentence() {
        let json = serde_json::to_value(ReverseSentenceResponse::default()).unwrap();
        assert_eq!(json, json!({"errors": []}));
    }
}
