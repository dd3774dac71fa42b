//! API route definitions.
//!
//! This module organizes all HTTP routes for the Tracklog API server.

mod health;
mod words;

pub use health::health_routes;
pub use words::{reverse_sentence, words_routes, REVERSE_WORDS_SERVICE, WORDS_LOOKUP_SERVICE};
