//! Search over persisted audit records.
//!
//! A search goes through three steps: [`SearchEngine::build_query`] validates
//! the caller's criteria, [`SearchEngine::search`] runs the query against the
//! store, and [`SearchEngine::to_result_records`] rebuilds typed request and
//! response bodies from the stored payloads. [`SearchEngine::execute`] chains
//! the three and reports an empty result as [`SearchOutcome::NoMatches`].
//!
//! Invalid criteria never reach the store: a [`SearchQuery`] can only be
//! obtained from `build_query`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{codes, ErrorStatus, Payload, PersistedRecord, SearchWordRequest, Severity};
use crate::storage::{RecordQuery, RecordStore, RecordStoreError};

/// Upper bound on the number of records returned by any search.
pub const MAX_RESULTS: usize = 100;

/// Message reported when neither a word nor the all-records flag is given.
pub const MISSING_CRITERIA_MESSAGE: &str =
    "Either word must be provided or all_records must be true";

/// Message reported when a valid search matched nothing.
pub const NO_MATCHES_MESSAGE: &str = "No records found matching the criteria";

/// Errors surfaced to search callers.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The criteria do not form a valid query.
    #[error("{0}")]
    InvalidCriteria(String),

    /// The record store failed.
    #[error("Record store error: {0}")]
    Storage(#[from] RecordStoreError),

    /// A stored payload does not fit the requested type.
    #[error("Record '{unique_id}' could not be converted: {source}")]
    Conversion {
        /// Key of the offending record.
        unique_id: String,
        /// Conversion failure.
        #[source]
        source: serde_json::Error,
    },
}

impl SearchError {
    /// Error code reported in response envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCriteria(_) => codes::INVALID_CRITERIA,
            Self::Storage(_) => codes::INTERNAL_ERROR,
            Self::Conversion { .. } => codes::RESULT_CONVERSION,
        }
    }

    /// The error as a coded envelope entry.
    #[must_use]
    pub fn to_status(&self) -> ErrorStatus {
        ErrorStatus::new(self.code(), self.to_string())
    }
}

/// Caller-supplied search filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Free-text term.
    pub word: Option<String>,
    /// Return records without requiring a word.
    pub all_records: Option<bool>,
    /// Exact severity filter.
    pub severity: Option<String>,
}

impl SearchCriteria {
    /// Creates empty criteria (invalid until a word or `all_records` is set).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the free-text term.
    #[must_use]
    pub fn with_word(mut self, word: impl Into<String>) -> Self {
        self.word = Some(word.into());
        self
    }

    /// Sets the all-records flag.
    #[must_use]
    pub fn with_all_records(mut self, all_records: bool) -> Self {
        self.all_records = Some(all_records);
        self
    }

    /// Sets the severity filter.
    #[must_use]
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }
}

impl From<&SearchWordRequest> for SearchCriteria {
    fn from(request: &SearchWordRequest) -> Self {
        Self {
            word: request.word.clone(),
            all_records: request.all_records,
            severity: request.severity.clone(),
        }
    }
}

/// A validated query. Only [`SearchEngine::build_query`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery(RecordQuery);

impl SearchQuery {
    /// The store query this search runs.
    #[must_use]
    pub fn record_query(&self) -> &RecordQuery {
        &self.0
    }
}

/// Result of a search that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Matching records, most relevant first.
    Found(Vec<PersistedRecord>),
    /// The query matched nothing.
    NoMatches,
}

impl SearchOutcome {
    /// The error entry reported for this outcome, if any.
    #[must_use]
    pub fn status(&self) -> Option<ErrorStatus> {
        match self {
            Self::Found(_) => None,
            Self::NoMatches => Some(ErrorStatus::new(codes::EMPTY_RESULT, NO_MATCHES_MESSAGE)),
        }
    }
}

/// A record with its payloads rebuilt into typed bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord<Req, Res> {
    /// The searched word, when one was supplied.
    pub word: Option<String>,
    /// Key of the record.
    pub unique_id: String,
    /// Operation that produced the record.
    pub service_name: String,
    /// Recorded severity.
    pub severity: Severity,
    /// Recorded request, if it was captured structured.
    pub request: Option<Req>,
    /// Recorded response, if it was captured structured.
    pub response: Option<Res>,
}

/// Criteria-driven search over a [`RecordStore`].
#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine").finish_non_exhaustive()
    }
}

impl SearchEngine {
    /// Creates a search engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Validates criteria and builds the query.
    ///
    /// Blank words and severities count as absent. The query is always
    /// limited to [`MAX_RESULTS`].
    ///
    /// # Errors
    ///
    /// Returns `SearchError::InvalidCriteria` if:
    /// - The word is absent or blank and `all_records` is not true
    /// - The severity is neither `INFO` nor `ERROR`
    ///
    /// # Example
    ///
    /// ```
    /// use shared::models::Severity;
    /// use shared::search::{SearchEngine, MAX_RESULTS};
    ///
    /// let query = SearchEngine::build_query(Some("hello"), None, Some("ERROR")).unwrap();
    /// assert_eq!(query.record_query().severity, Some(Severity::Error));
    /// assert_eq!(query.record_query().limit, Some(MAX_RESULTS));
    ///
    /// assert!(SearchEngine::build_query(Some(" "), Some(false), None).is_err());
    /// ```
    pub fn build_query(
        word: Option<&str>,
        all_records: Option<bool>,
        severity: Option<&str>,
    ) -> Result<SearchQuery, SearchError> {
        let word = word.map(str::trim).filter(|w| !w.is_empty());
        let severity = severity.map(str::trim).filter(|s| !s.is_empty());

        if word.is_none() && all_records != Some(true) {
            return Err(SearchError::InvalidCriteria(
                MISSING_CRITERIA_MESSAGE.to_string(),
            ));
        }

        let mut query = RecordQuery::new().with_limit(MAX_RESULTS);

        if let Some(word) = word {
            query = query.with_text(word);
        }

        if let Some(severity) = severity {
            let severity: Severity = severity
                .parse()
                .map_err(|e: crate::models::UnknownSeverity| {
                    SearchError::InvalidCriteria(e.to_string())
                })?;
            query = query.with_severity(severity);
        }

        Ok(SearchQuery(query))
    }

    /// Runs a built query.
    ///
    /// A query that failed validation returns no records without touching
    /// the store.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Storage` if the store fails.
    pub fn search(
        &self,
        query: &Result<SearchQuery, SearchError>,
    ) -> Result<Vec<PersistedRecord>, SearchError> {
        let Ok(query) = query else {
            return Ok(Vec::new());
        };

        let result = self.store.query(query.record_query())?;
        tracing::debug!(
            returned = result.records.len(),
            total = result.total_count,
            "Record search executed"
        );
        Ok(result.records)
    }

    /// Validates criteria, runs the query and classifies the result.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::InvalidCriteria` for invalid criteria and
    /// `SearchError::Storage` if the store fails.
    pub fn execute(&self, criteria: &SearchCriteria) -> Result<SearchOutcome, SearchError> {
        let query = Self::build_query(
            criteria.word.as_deref(),
            criteria.all_records,
            criteria.severity.as_deref(),
        );
        if let Err(e) = &query {
            tracing::info!(error = %e, "Search criteria rejected");
        }

        let records = self.search(&query)?;
        query?;

        if records.is_empty() {
            Ok(SearchOutcome::NoMatches)
        } else {
            Ok(SearchOutcome::Found(records))
        }
    }

    /// Rebuilds typed request and response bodies from records.
    ///
    /// Absent and raw payloads become `None`.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Conversion` for the first record whose
    /// structured payload does not fit `Req` or `Res`.
    pub fn to_result_records<Req, Res>(
        records: Vec<PersistedRecord>,
        word: Option<&str>,
    ) -> Result<Vec<ResultRecord<Req, Res>>, SearchError>
    where
        Req: DeserializeOwned,
        Res: DeserializeOwned,
    {
        let word = word.map(str::trim).filter(|w| !w.is_empty());

        records
            .into_iter()
            .map(|record| {
                let request = convert::<Req>(&record.request_body, &record.unique_id)?;
                let response = convert::<Res>(&record.response_body, &record.unique_id)?;

                Ok(ResultRecord {
                    word: word.map(str::to_string),
                    unique_id: record.unique_id,
                    service_name: record.service_name,
                    severity: record.severity,
                    request,
                    response,
                })
            })
            .collect()
    }
}

fn convert<T: DeserializeOwned>(payload: &Payload, unique_id: &str) -> Result<Option<T>, SearchError> {
    payload
        .as_value()
        .map(|value| {
            serde_json::from_value(value.clone()).map_err(|source| SearchError::Conversion {
                unique_id: unique_id.to_string(),
                source,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReverseSentenceRequest, ReverseSentenceResponse, TrackedEvent};
    use crate::storage::{InMemoryRecordStore, RecordQueryResult};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(sentence: &str, severity: Severity) -> PersistedRecord {
        let now = Utc::now();
        let reversed: String = sentence
            .split(' ')
            .map(|w| w.chars().rev().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ");
        PersistedRecord::from_event(TrackedEvent::new(
            "ReverseWordsService",
            Payload::structured(json!({ "sentence": sentence })),
            Payload::structured(json!({ "reversed_sentence": reversed, "errors": [] })),
            now,
            now + Duration::milliseconds(3),
            severity,
        ))
    }

    fn engine_with(records: Vec<PersistedRecord>) -> SearchEngine {
        let store = InMemoryRecordStore::new_shared();
        for record in records {
            store.upsert(record).unwrap();
        }
        SearchEngine::new(store)
    }

    #[derive(Default)]
    struct CountingStore {
        queries: AtomicUsize,
    }

    impl RecordStore for CountingStore {
        fn upsert(&self, _record: PersistedRecord) -> Result<(), RecordStoreError> {
            Ok(())
        }

        fn get(&self, _unique_id: &str) -> Result<Option<PersistedRecord>, RecordStoreError> {
            Ok(None)
        }

        fn query(&self, _query: &RecordQuery) -> Result<RecordQueryResult, RecordStoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(RecordQueryResult {
                records: vec![],
                total_count: 0,
            })
        }

        fn count(&self) -> Result<usize, RecordStoreError> {
            Ok(0)
        }

        fn clear(&self) -> Result<(), RecordStoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_build_query_requires_word_or_all_records() {
        for (word, all_records) in [(None, None), (Some(""), Some(false)), (Some("   "), None)] {
            let err = SearchEngine::build_query(word, all_records, Some("ERROR")).unwrap_err();
            assert!(matches!(err, SearchError::InvalidCriteria(_)));
            assert_eq!(err.code(), codes::INVALID_CRITERIA);
            assert_eq!(err.to_string(), MISSING_CRITERIA_MESSAGE);
        }
    }

    #[test]
    fn test_build_query_all_records_is_unrestricted() {
        let query = SearchEngine::build_query(None, Some(true), None).unwrap();
        assert_eq!(
            query.record_query(),
            &RecordQuery::new().with_limit(MAX_RESULTS)
        );
    }

    #[test]
    fn test_build_query_word_and_severity() {
        let query = SearchEngine::build_query(Some("hello"), Some(false), Some("ERROR")).unwrap();
        assert_eq!(
            query.record_query(),
            &RecordQuery::new()
                .with_limit(MAX_RESULTS)
                .with_text("hello")
                .with_severity(Severity::Error)
        );
    }

    #[test]
    fn test_build_query_blank_severity_is_ignored() {
        let query = SearchEngine::build_query(None, Some(true), Some(" ")).unwrap();
        assert_eq!(query.record_query().severity, None);
    }

    #[test]
    fn test_build_query_unknown_severity_is_invalid() {
        let err = SearchEngine::build_query(Some("x"), None, Some("WARN")).unwrap_err();
        assert!(matches!(err, SearchError::InvalidCriteria(_)));
    }

    #[test]
    fn test_invalid_criteria_never_reach_store() {
        let store = Arc::new(CountingStore::default());
        let engine = SearchEngine::new(store.clone());

        let query = SearchEngine::build_query(Some(""), Some(false), None);
        assert!(engine.search(&query).unwrap().is_empty());

        let outcome = engine.execute(&SearchCriteria::new().with_severity("INFO"));
        assert!(matches!(outcome, Err(SearchError::InvalidCriteria(_))));

        assert_eq!(store.queries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_valid_search_makes_one_store_call() {
        let store = Arc::new(CountingStore::default());
        let engine = SearchEngine::new(store.clone());

        let outcome = engine
            .execute(&SearchCriteria::new().with_word("hello"))
            .unwrap();

        assert_eq!(outcome, SearchOutcome::NoMatches);
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_distinguishes_outcomes() {
        let engine = engine_with(vec![record("Hello World", Severity::Info)]);

        let found = engine
            .execute(&SearchCriteria::new().with_word("hello"))
            .unwrap();
        assert!(matches!(found, SearchOutcome::Found(ref records) if records.len() == 1));
        assert!(found.status().is_none());

        let none = engine
            .execute(&SearchCriteria::new().with_word("absent"))
            .unwrap();
        assert_eq!(none, SearchOutcome::NoMatches);
        assert_eq!(none.status().unwrap().code, codes::EMPTY_RESULT);
    }

    #[test]
    fn test_search_is_capped_at_max_results() {
        let records = (0..150)
            .map(|i| record(&format!("sentence {i}"), Severity::Info))
            .collect();
        let engine = engine_with(records);

        let query = SearchEngine::build_query(None, Some(true), None);
        assert_eq!(engine.search(&query).unwrap().len(), MAX_RESULTS);
    }

    #[test]
    fn test_word_match_is_case_insensitive_or() {
        let engine = engine_with(vec![
            record("Hello there", Severity::Info),
            record("General Kenobi", Severity::Info),
            record("Nothing", Severity::Info),
        ]);

        let query = SearchEngine::build_query(Some("HELLO kenobi"), None, None);
        assert_eq!(engine.search(&query).unwrap().len(), 2);
    }

    #[test]
    fn test_severity_composes_with_word() {
        let engine = engine_with(vec![
            record("hello ok", Severity::Info),
            record("hello failed", Severity::Error),
        ]);

        let query = SearchEngine::build_query(Some("hello"), Some(true), Some("error"));
        let records = engine.search(&query).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Error);
    }

    #[test]
    fn test_result_records_round_trip() {
        let stored = record("Hello World", Severity::Info);
        let engine = engine_with(vec![stored.clone()]);

        let query = SearchEngine::build_query(Some("world"), None, None);
        let records = engine.search(&query).unwrap();
        let results = SearchEngine::to_result_records::<
            ReverseSentenceRequest,
            ReverseSentenceResponse,
        >(records, Some("world"))
        .unwrap();

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.word.as_deref(), Some("world"));
        assert_eq!(result.unique_id, stored.unique_id);
        assert_eq!(
            result.request,
            Some(ReverseSentenceRequest {
                sentence: "Hello World".to_string()
            })
        );
        assert_eq!(
            result.response,
            Some(ReverseSentenceResponse {
                reversed_sentence: Some("olleH dlroW".to_string()),
                errors: vec![],
            })
        );
    }

    #[test]
    fn test_result_records_absent_and_raw_are_none() {
        let now = Utc::now();
        let record = PersistedRecord::from_event(TrackedEvent::new(
            "svc",
            Payload::Absent,
            Payload::raw("opaque"),
            now,
            now,
            Severity::Error,
        ));

        let results = SearchEngine::to_result_records::<
            ReverseSentenceRequest,
            ReverseSentenceResponse,
        >(vec![record], None)
        .unwrap();

        assert_eq!(results[0].request, None);
        assert_eq!(results[0].response, None);
        assert_eq!(results[0].word, None);
    }

    #[test]
    fn test_result_records_conversion_failure() {
        let now = Utc::now();
        let record = PersistedRecord::from_event(TrackedEvent::new(
            "svc",
            Payload::structured(json!({ "sentence": 42 })),
            Payload::Absent,
            now,
            now,
            Severity::Info,
        ));
        let unique_id = record.unique_id.clone();

        let err = SearchEngine::to_result_records::<
            ReverseSentenceRequest,
            ReverseSentenceResponse,
        >(vec![record], None)
        .unwrap_err();

        assert!(matches!(err, SearchError::Conversion { unique_id: ref id, .. } if *id == unique_id));
        assert_eq!(err.code(), codes::RESULT_CONVERSION);
    }

    #[test]
    fn test_criteria_from_request() {
        let request = SearchWordRequest {
            word: Some("hello".to_string()),
            all_records: Some(true),
            severity: None,
        };
        assert_eq!(
            SearchCriteria::from(&request),
            SearchCriteria::new().with_word("hello").with_all_records(true)
        );
    }
}
