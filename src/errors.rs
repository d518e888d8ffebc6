// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine error taxonomy
//!
//! Only configuration errors and backend-availability errors cross the
//! dispatcher boundary; everything else is absorbed into per-result `errors`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a query before any work is scheduled, plus the
/// backend-unavailable class surfaced through `SearchResult.errors`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid search pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("search root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("invalid range for {field}: min {min} exceeds max {max}")]
    InvalidRange {
        field: &'static str,
        min: u64,
        max: u64,
    },

    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),
}
