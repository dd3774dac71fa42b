//! Configuration module for Tracklog.
//!
//! This module contains the configuration of the audit pipeline.

pub mod pipeline;

pub use pipeline::{env_parse, ConfigError, PipelineConfig, DEFAULT_CONSUMER_GROUP, DEFAULT_TOPIC};
