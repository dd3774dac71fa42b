//! Record storage trait and implementations.
//!
//! Provides the `RecordStore` trait for abstracting the audit document store,
//! an `InMemoryRecordStore` for development and testing, and a
//! `ClickHouseRecordStore` for production use.

use crate::models::{tokenize, Payload, PersistedRecord, Severity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// Failed to acquire lock on the store.
    #[error("Failed to acquire lock on record store")]
    LockError,

    /// A stored row could not be decoded.
    #[error("Corrupt record '{unique_id}': {reason}")]
    CorruptRecord {
        /// Key of the unreadable record.
        unique_id: String,
        /// Decoding failure.
        reason: String,
    },

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Full-text criterion: a record matches when any term is one of its tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    /// Lower-cased search terms.
    pub terms: Vec<String>,
}

impl TextMatch {
    /// Builds a text criterion from free text.
    ///
    /// # Example
    ///
    /// ```
    /// use shared::storage::TextMatch;
    ///
    /// let text = TextMatch::parse("Hello, World");
    /// assert_eq!(text.terms, vec!["hello", "world"]);
    /// ```
    #[must_use]
    pub fn parse(word: &str) -> Self {
        let mut terms: Vec<String> = Vec::new();
        for term in tokenize(word) {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        Self { terms }
    }

    /// Relevance of a record: the number of its tokens equal to any term.
    #[must_use]
    pub fn score(&self, record: &PersistedRecord) -> usize {
        record
            .tokens()
            .filter(|token| self.terms.iter().any(|term| term == token))
            .count()
    }
}

/// Query parameters for retrieving records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    /// Full-text criterion.
    pub text: Option<TextMatch>,

    /// Filter by severity (exact match).
    pub severity: Option<Severity>,

    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl RecordQuery {
    /// Creates a new empty query (returns all records).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the full-text criterion.
    #[must_use]
    pub fn with_text(mut self, word: &str) -> Self {
        self.text = Some(TextMatch::parse(word));
        self
    }

    /// Sets the severity filter.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of a record query operation.
#[derive(Debug, Clone)]
pub struct RecordQueryResult {
    /// The records matching the query, most relevant first.
    pub records: Vec<PersistedRecord>,

    /// Total count of matching records (before limit applied).
    pub total_count: usize,
}

/// Trait for record storage implementations.
///
/// Records are keyed by `unique_id`; writing an existing key replaces the
/// stored document. Implementations must be thread-safe (Send + Sync).
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn upsert(&self, record: PersistedRecord) -> Result<(), RecordStoreError>;

    /// Fetches a record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get(&self, unique_id: &str) -> Result<Option<PersistedRecord>, RecordStoreError>;

    /// Queries records based on the provided parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the query operation fails.
    fn query(&self, query: &RecordQuery) -> Result<RecordQueryResult, RecordStoreError>;

    /// Returns the total number of records in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn count(&self) -> Result<usize, RecordStoreError>;

    /// Clears all records from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the clear operation fails.
    fn clear(&self) -> Result<(), RecordStoreError>;
}

/// In-memory record store implementation.
///
/// Records live in a `HashMap` keyed by unique id behind a `RwLock`.
///
/// **Note:** Data is not persisted across restarts.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use shared::models::{Payload, PersistedRecord, Severity, TrackedEvent};
/// use shared::storage::{InMemoryRecordStore, RecordQuery, RecordStore};
///
/// let store = InMemoryRecordStore::new();
///
/// let now = Utc::now();
/// let event = TrackedEvent::new("svc", Payload::Absent, Payload::Absent, now, now, Severity::Info);
/// store.upsert(PersistedRecord::from_event(event)).unwrap();
///
/// let result = store.query(&RecordQuery::new()).unwrap();
/// assert_eq!(result.records.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<String, PersistedRecord>>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty in-memory record store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a new in-memory record store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl RecordStore for InMemoryRecordStore {
    fn upsert(&self, record: PersistedRecord) -> Result<(), RecordStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RecordStoreError::LockError)?;
        records.insert(record.unique_id.clone(), record);
        Ok(())
    }

    fn get(&self, unique_id: &str) -> Result<Option<PersistedRecord>, RecordStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| RecordStoreError::LockError)?;
        Ok(records.get(unique_id).cloned())
    }

    fn query(&self, query: &RecordQuery) -> Result<RecordQueryResult, RecordStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| RecordStoreError::LockError)?;

        let mut matched: Vec<(usize, &PersistedRecord)> = records
            .values()
            .filter(|record| query.severity.map_or(true, |s| record.severity == s))
            .filter_map(|record| match query.text {
                Some(ref text) => {
                    let score = text.score(record);
                    (score > 0).then_some((score, record))
                }
                None => Some((0, record)),
            })
            .collect();

        // Most relevant first, newest first among equals
        matched.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .cmp(a_score)
                .then_with(|| b.request_ts.cmp(&a.request_ts))
                .then_with(|| a.unique_id.cmp(&b.unique_id))
        });

        let total_count = matched.len();
        let records = matched
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(_, record)| record.clone())
            .collect();

        Ok(RecordQueryResult {
            records,
            total_count,
        })
    }

    fn count(&self) -> Result<usize, RecordStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| RecordStoreError::LockError)?;
        Ok(records.len())
    }

    fn clear(&self) -> Result<(), RecordStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RecordStoreError::LockError)?;
        records.clear();
        Ok(())
    }
}

/// Row layout of the `track_logs` table.
#[derive(clickhouse::Row, serde::Serialize, serde::Deserialize)]
struct RecordRow {
    unique_id: String,
    service_name: String,
    severity: String,
    request_body: String,
    response_body: String,
    request_ts: i64,
    response_ts: i64,
    execution_time_ms: u64,
    search_text: String,
}

impl RecordRow {
    fn from_record(record: &PersistedRecord) -> Result<Self, RecordStoreError> {
        let encode = |payload: &Payload| {
            serde_json::to_string(payload).map_err(|e| RecordStoreError::StorageError(e.to_string()))
        };

        Ok(Self {
            unique_id: record.unique_id.clone(),
            service_name: record.service_name.clone(),
            severity: record.severity.to_string(),
            request_body: encode(&record.request_body)?,
            response_body: encode(&record.response_body)?,
            request_ts: record.request_ts.timestamp_nanos_opt().unwrap_or(0),
            response_ts: record.response_ts.timestamp_nanos_opt().unwrap_or(0),
            execution_time_ms: record.execution_time_ms,
            search_text: record.search_text.clone(),
        })
    }

    fn into_record(self) -> Result<PersistedRecord, RecordStoreError> {
        let unique_id = self.unique_id;
        let corrupt = |reason: String| RecordStoreError::CorruptRecord {
            unique_id: unique_id.clone(),
            reason,
        };

        let request_body: Payload =
            serde_json::from_str(&self.request_body).map_err(|e| corrupt(e.to_string()))?;
        let response_body: Payload =
            serde_json::from_str(&self.response_body).map_err(|e| corrupt(e.to_string()))?;
        let severity: Severity = self
            .severity
            .parse()
            .map_err(|e: crate::models::UnknownSeverity| corrupt(e.to_string()))?;

        Ok(PersistedRecord {
            unique_id: unique_id.clone(),
            service_name: self.service_name,
            request_body,
            response_body,
            request_ts: DateTime::<Utc>::from_timestamp_nanos(self.request_ts),
            response_ts: DateTime::<Utc>::from_timestamp_nanos(self.response_ts),
            execution_time_ms: self.execution_time_ms,
            severity,
            search_text: self.search_text,
        })
    }
}

/// A `track_logs` row followed by the window count of the query it answers.
#[derive(clickhouse::Row, serde::Deserialize)]
struct CountedRow {
    unique_id: String,
    service_name: String,
    severity: String,
    request_body: String,
    response_body: String,
    request_ts: i64,
    response_ts: i64,
    execution_time_ms: u64,
    search_text: String,
    total_count: u64,
}

impl CountedRow {
    fn into_row(self) -> RecordRow {
        RecordRow {
            unique_id: self.unique_id,
            service_name: self.service_name,
            severity: self.severity,
            request_body: self.request_body,
            response_body: self.response_body,
            request_ts: self.request_ts,
            response_ts: self.response_ts,
            execution_time_ms: self.execution_time_ms,
            search_text: self.search_text,
        }
    }
}

const RECORD_COLUMNS: &str = "unique_id, service_name, severity, request_body, response_body, \
     request_ts, response_ts, execution_time_ms, search_text";

/// `ClickHouse`-backed record store implementation.
///
/// Uses a `ReplacingMergeTree` keyed by `unique_id` so that rewriting a key
/// collapses to a single document; reads use `FINAL`.
#[derive(Clone)]
pub struct ClickHouseRecordStore {
    client: Arc<clickhouse::Client>,
}

impl ClickHouseRecordStore {
    /// DDL for the record table with its text and severity indexes.
    pub const CREATE_TABLE: &'static str = "CREATE TABLE IF NOT EXISTS track_logs (
    unique_id String,
    service_name String,
    severity LowCardinality(String),
    request_body String,
    response_body String,
    request_ts Int64,
    response_ts Int64,
    execution_time_ms UInt64,
    search_text String,
    INDEX idx_search_text search_text TYPE tokenbf_v1(32768, 3, 0) GRANULARITY 4,
    INDEX idx_severity severity TYPE set(2) GRANULARITY 4
) ENGINE = ReplacingMergeTree
ORDER BY unique_id";

    /// Creates a new `ClickHouse` record store with the given client.
    #[must_use]
    pub fn new(client: Arc<clickhouse::Client>) -> Self {
        Self { client }
    }

    /// Creates a new `ClickHouse` record store wrapped in an Arc.
    #[must_use]
    pub fn new_shared(client: Arc<clickhouse::Client>) -> Arc<Self> {
        Arc::new(Self::new(client))
    }

    /// Creates the record table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), RecordStoreError> {
        self.client
            .query(Self::CREATE_TABLE)
            .execute()
            .await
            .map_err(|e| RecordStoreError::StorageError(e.to_string()))
    }

    /// Builds the `WHERE` clause and relevance expression for a query.
    ///
    /// `hasToken` prunes with the token index; relevance counts every token
    /// of `search_text` equal to a term, as the in-memory store does.
    fn filter_sql(query: &RecordQuery) -> (String, Option<String>) {
        let mut filter = String::from(" WHERE 1=1");

        if let Some(severity) = query.severity {
            filter.push_str(&format!(" AND severity = '{severity}'"));
        }

        let relevance = query.text.as_ref().map(|text| {
            if text.terms.is_empty() {
                filter.push_str(" AND 0");
                return "0".to_string();
            }

            let terms: Vec<String> = text
                .terms
                .iter()
                .map(|term| format!("'{}'", escape_literal(term)))
                .collect();
            let has_any = terms
                .iter()
                .map(|term| format!("hasToken(search_text, {term})"))
                .collect::<Vec<_>>()
                .join(" OR ");
            filter.push_str(&format!(" AND ({has_any})"));

            format!(
                "arrayCount(token -> has([{}], token), splitByChar(' ', search_text))",
                terms.join(", ")
            )
        });

        (filter, relevance)
    }

    /// Builds the single statement answering a query. The total match count
    /// rides along as a window column.
    fn select_sql(query: &RecordQuery) -> String {
        let (filter, relevance) = Self::filter_sql(query);

        let order = match relevance {
            Some(relevance) => format!(" ORDER BY ({relevance}) DESC, request_ts DESC"),
            None => " ORDER BY request_ts DESC".to_string(),
        };

        let mut sql = format!(
            "SELECT {RECORD_COLUMNS}, count() OVER () AS total_count \
             FROM track_logs FINAL{filter}{order}"
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    /// Helper to execute async operations synchronously.
    fn block_on<F, T>(future: F) -> Result<T, RecordStoreError>
    where
        F: std::future::Future<Output = Result<T, clickhouse::error::Error>>,
    {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(future)
                .map_err(|e| RecordStoreError::StorageError(e.to_string()))
        })
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

impl RecordStore for ClickHouseRecordStore {
    fn upsert(&self, record: PersistedRecord) -> Result<(), RecordStoreError> {
        let row = RecordRow::from_record(&record)?;
        let client = Arc::clone(&self.client);

        Self::block_on(async move {
            let mut inserter = client.insert::<RecordRow>("track_logs").await?;
            inserter.write(&row).await?;
            inserter.end().await?;
            Ok(())
        })
    }

    fn get(&self, unique_id: &str) -> Result<Option<PersistedRecord>, RecordStoreError> {
        let client = Arc::clone(&self.client);
        let sql = format!("SELECT {RECORD_COLUMNS} FROM track_logs FINAL WHERE unique_id = ?");
        let unique_id = unique_id.to_string();

        let row = Self::block_on(async move {
            client
                .query(&sql)
                .bind(unique_id)
                .fetch_optional::<RecordRow>()
                .await
        })?;

        row.map(RecordRow::into_record).transpose()
    }

    fn query(&self, query: &RecordQuery) -> Result<RecordQueryResult, RecordStoreError> {
        let sql = Self::select_sql(query);
        let client = Arc::clone(&self.client);
        let rows: Vec<CountedRow> =
            Self::block_on(async move { client.query(&sql).fetch_all::<CountedRow>().await })?;

        let total_count = rows.first().map_or(0, |row| row.total_count);
        let records = rows
            .into_iter()
            .map(|row| row.into_row().into_record())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RecordQueryResult {
            records,
            total_count: usize::try_from(total_count).unwrap_or(usize::MAX),
        })
    }

    fn count(&self) -> Result<usize, RecordStoreError> {
        let client = Arc::clone(&self.client);
        let count: u64 = Self::block_on(async move {
            client
                .query("SELECT count() FROM track_logs FINAL")
                .fetch_one::<u64>()
                .await
        })?;

        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    fn clear(&self) -> Result<(), RecordStoreError> {
        let client = Arc::clone(&self.client);
        Self::block_on(async move { client.query("TRUNCATE TABLE track_logs").execute().await })
    }
}
