// src/store/mod.rs
//
// Storage seam of the engine. `DedupStore` serves the read side and hands out
// units of work; every write of a cluster persist or a merge goes through one
// `UnitOfWork`, which is committed or rolled back as a whole.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::core::{ListingDetails, ListingProvenance, ListingRecord, MergeListing};
use crate::models::matching::{CandidateUpsert, DedupCandidate};

/// What an upsert did to the candidate row of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The row is already `MERGED` and was left untouched.
    SkippedMerged,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Active, non-hidden listings with their earliest-seen source platform.
    async fn load_active_listings(&self) -> Result<Vec<ListingRecord>>;

    /// Persisted candidates touching `listing_id`, highest score first.
    async fn find_candidates_for_listing(&self, listing_id: &str) -> Result<Vec<DedupCandidate>>;

    /// `PENDING` candidates scoring at least `threshold`, highest score first.
    async fn pending_candidates_above(&self, threshold: f64) -> Result<Vec<DedupCandidate>>;

    async fn listing_provenance(&self, listing_id: &str) -> Result<Option<ListingProvenance>>;

    /// Moves a `PENDING` candidate to `REJECTED`. Returns false when no pending row exists.
    async fn reject_candidate(&self, listing_id_a: &str, listing_id_b: &str, resolved_by: &str) -> Result<bool>;

    /// Non-blocking attempt to take the process-wide run lock.
    async fn try_acquire_run_lock(&self) -> Result<bool>;

    async fn release_run_lock(&self) -> Result<()>;

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Current group of each listing, in the order given.
    async fn group_ids_for(&mut self, listing_ids: &[String]) -> Result<Vec<(String, Option<String>)>>;

    /// Creates a new group and returns its id.
    async fn create_group(&mut self, primary_listing_id: Option<&str>) -> Result<String>;

    /// Sets `group_id` on the listings that have no group yet. Returns how many were assigned.
    async fn assign_group_if_unset(&mut self, listing_ids: &[String], group_id: &str) -> Result<u64>;

    /// Sets `group_id` on one listing, replacing any previous group.
    async fn set_listing_group(&mut self, listing_id: &str, group_id: &str) -> Result<()>;

    async fn set_group_primary(&mut self, group_id: &str, listing_id: &str) -> Result<()>;

    /// Insert-or-update keyed by the canonical pair. A failed upsert leaves the
    /// rest of the unit of work usable.
    async fn upsert_candidate(&mut self, candidate: &CandidateUpsert) -> Result<UpsertOutcome>;

    async fn load_merge_listing(&mut self, listing_id: &str) -> Result<Option<MergeListing>>;

    /// Points every provenance row of `from_listing_id` at `to_listing_id`.
    async fn reassign_sources(&mut self, from_listing_id: &str, to_listing_id: &str) -> Result<u64>;

    async fn deactivate_listing(&mut self, listing_id: &str) -> Result<()>;

    /// Marks the pair's candidate row `MERGED`. Returns false when no row exists.
    async fn mark_candidate_merged(
        &mut self,
        listing_id_a: &str,
        listing_id_b: &str,
        resolved_by: &str,
    ) -> Result<bool>;

    /// Fills the primary's null fields from `details` and advances `last_seen_at`
    /// to `last_seen_at` when that is later. Non-null values are never replaced.
    async fn apply_backfill(
        &mut self,
        listing_id: &str,
        details: &ListingDetails,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
