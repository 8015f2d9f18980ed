// src/errors.rs

use thiserror::Error;

/// Domain failures callers may want to match on (via `anyhow::Error::downcast_ref`).
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("listing not found: {0}")]
    ListingNotFound(String),
    #[error("cannot merge listing {0} into itself")]
    SelfMerge(String),
    #[error("another deduplication run currently holds the run lock")]
    LockUnavailable,
    #[error("invalid value for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}
