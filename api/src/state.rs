//! Application state module.
//!
//! Defines the shared application state that is passed to route handlers.

use shared::capture::EventCapture;
use shared::search::SearchEngine;
use shared::storage::RecordStore;
use std::sync::Arc;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Capture used by the tracking middleware.
    capture: EventCapture,
    /// Record store, absent when persistence is disabled.
    store: Option<Arc<dyn RecordStore>>,
    /// Maximum request body size read by the tracking middleware.
    max_body_bytes: usize,
}

impl AppState {
    /// Creates a new application state.
    #[must_use]
    pub fn new(
        capture: EventCapture,
        store: Option<Arc<dyn RecordStore>>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            capture,
            store,
            max_body_bytes,
        }
    }

    /// Returns the event capture.
    #[must_use]
    pub fn capture(&self) -> &EventCapture {
        &self.capture
    }

    /// Returns the record store, if one is configured.
    #[must_use]
    pub fn store(&self) -> Option<&dyn RecordStore> {
        self.store.as_deref()
    }

    /// Returns a search engine over the record store, if one is configured.
    #[must_use]
    pub fn search_engine(&self) -> Option<SearchEngine> {
        self.store.clone().map(SearchEngine::new)
    }

    /// Returns the maximum request body size.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}
