//! Word service endpoints.
//!
//! `POST /words/reverse` reverses every word of a sentence and
//! `POST /words/search` searches the audit records. Both are tracked.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::post,
    Json, Router,
};
use shared::capture::{RequestShape, TrackSpec};
use shared::models::{
    codes, ErrorStatus, ReverseSentenceRequest, ReverseSentenceResponse, SearchWordRequest,
    SearchWordResponse, WordRecord,
};
use shared::search::{SearchCriteria, SearchEngine, SearchError, SearchOutcome};
use validator::Validate;

use crate::state::AppState;
use crate::tracking::{track, Tracker};

/// Service name recorded for reverse calls.
pub const REVERSE_WORDS_SERVICE: &str = "ReverseWordsService";

/// Service name recorded for search calls.
pub const WORDS_LOOKUP_SERVICE: &str = "WordsLookupService";

/// Creates the word service routes.
pub fn words_routes(state: AppState) -> Router {
    let reverse_tracker = Tracker::new(
        state.capture().clone(),
        TrackSpec::new(REVERSE_WORDS_SERVICE)
            .with_request_shape(RequestShape::of::<ReverseSentenceRequest>()),
        state.max_body_bytes(),
    );
    let search_tracker = Tracker::new(
        state.capture().clone(),
        TrackSpec::new(WORDS_LOOKUP_SERVICE)
            .with_request_shape(RequestShape::of::<SearchWordRequest>()),
        state.max_body_bytes(),
    );

    let reverse = Router::new()
        .route("/words/reverse", post(reverse_words))
        .route_layer(from_fn_with_state(reverse_tracker, track));

    let search = Router::new()
        .route("/words/search", post(search_words))
        .with_state(state)
        .route_layer(from_fn_with_state(search_tracker, track));

    reverse.merge(search)
}

/// Reverses the characters of every space-separated word, keeping word
/// order and spacing.
///
/// # Example
///
/// ```
/// use api::routes::reverse_sentence;
///
/// assert_eq!(reverse_sentence("Hello  World"), "olleH  dlroW");
/// ```
#[must_use]
pub fn reverse_sentence(sentence: &str) -> String {
    sentence
        .split(' ')
        .map(|word| word.chars().rev().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

fn request_errors(rejection: Option<JsonRejection>, validation: Option<validator::ValidationErrors>) -> Vec<ErrorStatus> {
    let mut errors = Vec::new();
    if let Some(rejection) = rejection {
        errors.push(ErrorStatus::new(codes::REQUEST_VALIDATION, rejection.body_text()));
    }
    if let Some(validation) = validation {
        for (field, field_errors) in validation.field_errors() {
            for error in field_errors {
                let message = error
                    .message
                    .as_ref()
                    .map_or_else(|| format!("Invalid value for {field}"), ToString::to_string);
                errors.push(ErrorStatus::new(codes::REQUEST_VALIDATION, message));
            }
        }
    }
    errors
}

/// Handler for sentence reversal.
///
/// Returns 200 with the reversed sentence, or 400 with coded errors for a
/// malformed, invalid or blank request.
async fn reverse_words(
    payload: Result<Json<ReverseSentenceRequest>, JsonRejection>,
) -> (StatusCode, Json<ReverseSentenceResponse>) {
    let bad_request = |errors| {
        (
            StatusCode::BAD_REQUEST,
            Json(ReverseSentenceResponse {
                reversed_sentence: None,
                errors,
            }),
        )
    };

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(request_errors(Some(rejection), None)),
    };

    if let Err(validation) = request.validate() {
        return bad_request(request_errors(None, Some(validation)));
    }

    if request.sentence.trim().is_empty() {
        return bad_request(vec![ErrorStatus::new(
            codes::BLANK_SENTENCE,
            "Sentence cannot be all blank characters",
        )]);
    }

    (
        StatusCode::OK,
        Json(ReverseSentenceResponse {
            reversed_sentence: Some(reverse_sentence(&request.sentence)),
            errors: vec![],
        }),
    )
}

/// Handler for audit record search.
///
/// Returns 200 with matching records, 400 for invalid criteria, 404 when
/// nothing matched and 500 when the store or a stored record fails.
async fn search_words(
    State(state): State<AppState>,
    payload: Result<Json<SearchWordRequest>, JsonRejection>,
) -> (StatusCode, Json<SearchWordResponse>) {
    let failure = |status, errors| {
        (
            status,
            Json(SearchWordResponse {
                records: vec![],
                errors,
            }),
        )
    };

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return failure(
                StatusCode::BAD_REQUEST,
                request_errors(Some(rejection), None),
            )
        }
    };

    if let Err(validation) = request.validate() {
        return failure(
            StatusCode::BAD_REQUEST,
            request_errors(None, Some(validation)),
        );
    }

    let Some(engine) = state.search_engine() else {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![ErrorStatus::new(
                codes::INTERNAL_ERROR,
                "Record store is not configured",
            )],
        );
    };

    let outcome = engine.execute(&SearchCriteria::from(&request)).and_then(|outcome| {
        match outcome {
            SearchOutcome::Found(records) => SearchEngine::to_result_records::<
                ReverseSentenceRequest,
                ReverseSentenceResponse,
            >(records, request.word.as_deref())
            .map(Some),
            SearchOutcome::NoMatches => Ok(None),
        }
    });

    match outcome {
        Ok(Some(results)) => {
            let records = results
                .into_iter()
                .map(|result| WordRecord {
                    word: result.word,
                    unique_id: result.unique_id,
                    service_name: result.service_name,
                    severity: result.severity.to_string(),
                    request: result.request,
                    response: result.response,
                })
                .collect();

            (
                StatusCode::OK,
                Json(SearchWordResponse {
                    records,
                    errors: vec![],
                }),
            )
        }
        Ok(None) => failure(
            StatusCode::NOT_FOUND,
            SearchOutcome::NoMatches.status().into_iter().collect(),
        ),
        Err(e) => {
            let status = match e {
                SearchError::InvalidCriteria(_) => StatusCode::BAD_REQUEST,
                SearchError::Storage(_) | SearchError::Conversion { .. } => {
                    tracing::error!(error = %e, "Search failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            failure(status, vec![e.to_status()])
        }
    }
}
