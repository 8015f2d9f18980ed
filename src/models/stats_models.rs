// src/models/stats_models.rs

use serde::Serialize;

/// Result of a full or recent deduplication run.
///
/// Runs never return `Err`; failures are reported through `errors`.
/// Fatal failures appear as a single entry prefixed with `fatal:`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupRunResult {
    pub candidates_found: usize,
    pub groups_created: usize,
    pub errors: Vec<String>,
}

impl DedupRunResult {
    pub fn push_fatal(&mut self, message: impl std::fmt::Display) {
        self.errors.push(format!("fatal: {}", message));
    }

    pub fn has_fatal(&self) -> bool {
        self.errors.iter().any(|e| e.starts_with("fatal:"))
    }
}

/// What a single merge changed.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub primary_id: String,
    pub secondary_id: String,
    pub group_id: String,
    pub sources_reassigned: u64,
    pub fields_backfilled: Vec<&'static str>,
    pub candidate_marked: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoMergeSummary {
    pub candidates_considered: usize,
    pub merged: usize,
    pub skipped_already_merged: usize,
    /// Pairs touching a listing deactivated by an earlier merge.
    pub skipped_inactive: usize,
    pub failed: usize,
}

/// Counters collected while scoring one run, logged in the run summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringStats {
    pub listings_loaded: usize,
    pub pairs_blocked: usize,
    pub pairs_scored: usize,
    pub pairs_above_threshold: usize,
    pub clusters: usize,
    pub avg_candidate_score: f64,
}
