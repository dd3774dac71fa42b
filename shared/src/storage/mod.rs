//! Storage traits and implementations.
//!
//! This module provides the document store abstraction for persisted audit
//! records. The `RecordStore` trait allows different implementations
//! (in-memory, `ClickHouse`) behind the same interface.

pub mod record_store;

pub use record_store::{
    ClickHouseRecordStore, InMemoryRecordStore, RecordQuery, RecordQueryResult, RecordStore,
    RecordStoreError, TextMatch,
};
