// src/store/memory.rs
//
// In-process store with the same semantics as the Postgres store. Used by the
// engine tests and handy for dry runs over fixture data.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::errors::DedupError;
use crate::models::core::{ListingDetails, ListingProvenance, ListingRecord, MergeListing};
use crate::models::matching::{
    canonical_pair, CandidateStatus, CandidateUpsert, DedupCandidate, DedupGroup,
};
use crate::store::{DedupStore, UnitOfWork, UpsertOutcome};

#[derive(Debug, Clone)]
pub struct MemoryListing {
    pub record: ListingRecord,
    pub ebitda: Option<f64>,
    pub broker_company: Option<String>,
    pub year_established: Option<i32>,
    pub employees: Option<i32>,
    pub is_active: bool,
    pub is_hidden: bool,
    pub dedup_group_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl MemoryListing {
    pub fn new(record: ListingRecord) -> Self {
        let seen = record.created_at;
        Self {
            record,
            ebitda: None,
            broker_company: None,
            year_established: None,
            employees: None,
            is_active: true,
            is_hidden: false,
            dedup_group_id: None,
            first_seen_at: seen,
            last_seen_at: seen,
        }
    }

    pub fn details(&self) -> ListingDetails {
        let r = &self.record;
        ListingDetails {
            business_name: r.business_name.clone(),
            description: r.description.clone(),
            asking_price: r.asking_price,
            revenue: r.revenue,
            cash_flow: r.cash_flow,
            ebitda: self.ebitda,
            industry: r.industry.clone(),
            city: r.city.clone(),
            state: r.state.clone(),
            zip_code: r.zip_code.clone(),
            broker_name: r.broker_name.clone(),
            broker_company: self.broker_company.clone(),
            year_established: self.year_established,
            employees: self.employees,
        }
    }

    fn set_details(&mut self, d: ListingDetails) {
        let r = &mut self.record;
        r.business_name = d.business_name;
        r.description = d.description;
        r.asking_price = d.asking_price;
        r.revenue = d.revenue;
        r.cash_flow = d.cash_flow;
        r.industry = d.industry;
        r.city = d.city;
        r.state = d.state;
        r.zip_code = d.zip_code;
        r.broker_name = d.broker_name;
        self.ebitda = d.ebitda;
        self.broker_company = d.broker_company;
        self.year_established = d.year_established;
        self.employees = d.employees;
    }
}

/// One sighting of a listing on a platform.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub listing_id: String,
    pub platform: String,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub listings: BTreeMap<String, MemoryListing>,
    pub sources: Vec<SourceRow>,
    pub groups: BTreeMap<String, DedupGroup>,
    pub candidates: BTreeMap<(String, String), DedupCandidate>,
}

impl MemoryState {
    fn earliest_platform(&self, listing_id: &str) -> Option<String> {
        self.sources
            .iter()
            .filter(|s| s.listing_id == listing_id)
            .min_by_key(|s| s.seen_at)
            .map(|s| s.platform.clone())
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_load: bool,
    failing_pairs: HashSet<(String, String)>,
    failing_listings: HashSet<String>,
}

/// Units of work hold the state lock until they commit or roll back, so they are serialized.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Mutex<Faults>>,
    run_locked: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listing plus one provenance row for its `source_platform`, if set.
    pub async fn insert_listing(&self, record: ListingRecord) {
        let mut state = self.state.lock().await;
        if let Some(platform) = record.source_platform.clone() {
            state.sources.push(SourceRow {
                listing_id: record.id.clone(),
                platform,
                seen_at: record.created_at,
            });
        }
        state
            .listings
            .insert(record.id.clone(), MemoryListing::new(record));
    }

    pub async fn insert_memory_listing(&self, listing: MemoryListing) {
        let mut state = self.state.lock().await;
        state.listings.insert(listing.record.id.clone(), listing);
    }

    pub async fn add_source(&self, listing_id: &str, platform: &str, seen_at: DateTime<Utc>) {
        self.state.lock().await.sources.push(SourceRow {
            listing_id: listing_id.to_string(),
            platform: platform.to_string(),
            seen_at,
        });
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn listing(&self, listing_id: &str) -> Option<MemoryListing> {
        self.state.lock().await.listings.get(listing_id).cloned()
    }

    pub async fn candidate(&self, listing_id_a: &str, listing_id_b: &str) -> Option<DedupCandidate> {
        let (first, second) = canonical_pair(listing_id_a, listing_id_b);
        self.state
            .lock()
            .await
            .candidates
            .get(&(first.to_string(), second.to_string()))
            .cloned()
    }

    /// The next `load_active_listings` call fails.
    pub async fn fail_next_load(&self) {
        self.faults.lock().await.fail_next_load = true;
    }

    /// Every upsert of this pair fails as if a constraint were violated.
    pub async fn fail_upserts_for(&self, listing_id_a: &str, listing_id_b: &str) {
        let (first, second) = canonical_pair(listing_id_a, listing_id_b);
        self.faults
            .lock()
            .await
            .failing_pairs
            .insert((first.to_string(), second.to_string()));
    }

    /// Group assignment, source moves and deactivation touching this listing fail.
    pub async fn fail_writes_for(&self, listing_id: &str) {
        self.faults
            .lock()
            .await
            .failing_listings
            .insert(listing_id.to_string());
    }

    pub fn is_run_locked(&self) -> bool {
        self.run_locked.load(Ordering::SeqCst)
    }
}

fn sort_by_score_desc(candidates: &mut [DedupCandidate]) {
    candidates.sort_by(|a, b| {
        b.overall_score
            .total_cmp(&a.overall_score)
            .then_with(|| a.listing_id_1.cmp(&b.listing_id_1))
            .then_with(|| a.listing_id_2.cmp(&b.listing_id_2))
    });
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn load_active_listings(&self) -> Result<Vec<ListingRecord>> {
        {
            let mut faults = self.faults.lock().await;
            if faults.fail_next_load {
                faults.fail_next_load = false;
                bail!("simulated failure loading active listings");
            }
        }
        let state = self.state.lock().await;
        Ok(state
            .listings
            .values()
            .filter(|l| l.is_active && !l.is_hidden)
            .map(|l| {
                let mut record = l.record.clone();
                if let Some(platform) = state.earliest_platform(&record.id) {
                    record.source_platform = Some(platform);
                }
                record
            })
            .collect())
    }

    async fn find_candidates_for_listing(&self, listing_id: &str) -> Result<Vec<DedupCandidate>> {
        let state = self.state.lock().await;
        let mut found: Vec<DedupCandidate> = state
            .candidates
            .values()
            .filter(|c| c.involves(listing_id))
            .cloned()
            .collect();
        sort_by_score_desc(&mut found);
        Ok(found)
    }

    async fn pending_candidates_above(&self, threshold: f64) -> Result<Vec<DedupCandidate>> {
        let state = self.state.lock().await;
        let mut pending: Vec<DedupCandidate> = state
            .candidates
            .values()
            .filter(|c| c.status == CandidateStatus::Pending && c.overall_score >= threshold)
            .cloned()
            .collect();
        sort_by_score_desc(&mut pending);
        Ok(pending)
    }

    async fn listing_provenance(&self, listing_id: &str) -> Result<Option<ListingProvenance>> {
        let state = self.state.lock().await;
        Ok(state.listings.get(listing_id).map(|l| ListingProvenance {
            listing_id: listing_id.to_string(),
            is_active: l.is_active,
            source_count: state
                .sources
                .iter()
                .filter(|s| s.listing_id == listing_id)
                .count() as i64,
            first_seen_at: l.first_seen_at,
        }))
    }

    async fn reject_candidate(&self, listing_id_a: &str, listing_id_b: &str, resolved_by: &str) -> Result<bool> {
        let (first, second) = canonical_pair(listing_id_a, listing_id_b);
        let mut state = self.state.lock().await;
        match state
            .candidates
            .get_mut(&(first.to_string(), second.to_string()))
        {
            Some(c) if c.status == CandidateStatus::Pending => {
                let now = Utc::now();
                c.status = CandidateStatus::Rejected;
                c.resolved_by = Some(resolved_by.to_string());
                c.resolved_at = Some(now);
                c.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_acquire_run_lock(&self) -> Result<bool> {
        Ok(self
            .run_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    async fn release_run_lock(&self) -> Result<()> {
        self.run_locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let (failing_pairs, failing_listings) = {
            let faults = self.faults.lock().await;
            (faults.failing_pairs.clone(), faults.failing_listings.clone())
        };
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            failing_pairs,
            failing_listings,
        }))
    }
}

/// Writes go to a private copy of the state that replaces the shared one on commit.
pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    failing_pairs: HashSet<(String, String)>,
    failing_listings: HashSet<String>,
}

impl MemoryUnitOfWork {
    fn check_writable(&self, listing_id: &str) -> Result<()> {
        if self.failing_listings.contains(listing_id) {
            bail!("simulated write failure on listing {}", listing_id);
        }
        Ok(())
    }

    fn listing_mut(&mut self, listing_id: &str) -> Result<&mut MemoryListing> {
        self.working
            .listings
            .get_mut(listing_id)
            .ok_or_else(|| DedupError::ListingNotFound(listing_id.to_string()).into())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn group_ids_for(&mut self, listing_ids: &[String]) -> Result<Vec<(String, Option<String>)>> {
        Ok(listing_ids
            .iter()
            .map(|id| {
                let group = self
                    .working
                    .listings
                    .get(id)
                    .and_then(|l| l.dedup_group_id.clone());
                (id.clone(), group)
            })
            .collect())
    }

    async fn create_group(&mut self, primary_listing_id: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        self.working.groups.insert(
            id.clone(),
            DedupGroup {
                id: id.clone(),
                primary_listing_id: primary_listing_id.map(str::to_string),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn assign_group_if_unset(&mut self, listing_ids: &[String], group_id: &str) -> Result<u64> {
        if !self.working.groups.contains_key(group_id) {
            bail!("dedup group {} does not exist", group_id);
        }
        for id in listing_ids {
            self.check_writable(id)?;
        }
        let mut assigned = 0;
        for id in listing_ids {
            if let Some(listing) = self.working.listings.get_mut(id) {
                if listing.dedup_group_id.is_none() {
                    listing.dedup_group_id = Some(group_id.to_string());
                    assigned += 1;
                }
            }
        }
        Ok(assigned)
    }

    async fn set_listing_group(&mut self, listing_id: &str, group_id: &str) -> Result<()> {
        if !self.working.groups.contains_key(group_id) {
            bail!("dedup group {} does not exist", group_id);
        }
        self.check_writable(listing_id)?;
        self.listing_mut(listing_id)?.dedup_group_id = Some(group_id.to_string());
        Ok(())
    }

    async fn set_group_primary(&mut self, group_id: &str, listing_id: &str) -> Result<()> {
        let group = self
            .working
            .groups
            .get_mut(group_id)
            .ok_or_else(|| anyhow!("dedup group {} does not exist", group_id))?;
        group.primary_listing_id = Some(listing_id.to_string());
        group.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_candidate(&mut self, candidate: &CandidateUpsert) -> Result<UpsertOutcome> {
        let key = (candidate.listing_id_1.clone(), candidate.listing_id_2.clone());
        if self.failing_pairs.contains(&key) {
            bail!(
                "constraint violation upserting candidate ({}, {})",
                key.0,
                key.1
            );
        }
        for id in [&key.0, &key.1] {
            if !self.working.listings.contains_key(id.as_str()) {
                bail!("candidate references unknown listing {}", id);
            }
        }

        let now = Utc::now();
        match self.working.candidates.get_mut(&key) {
            Some(existing) if existing.status == CandidateStatus::Merged => Ok(UpsertOutcome::SkippedMerged),
            Some(existing) => {
                existing.overall_score = candidate.overall_score;
                existing.field_scores = candidate.field_scores;
                existing.matched_fields = candidate.matched_fields.clone();
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                self.working.candidates.insert(
                    key.clone(),
                    DedupCandidate {
                        id: Uuid::new_v4().to_string(),
                        listing_id_1: key.0,
                        listing_id_2: key.1,
                        overall_score: candidate.overall_score,
                        field_scores: candidate.field_scores,
                        matched_fields: candidate.matched_fields.clone(),
                        status: CandidateStatus::Pending,
                        resolved_by: None,
                        resolved_at: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn load_merge_listing(&mut self, listing_id: &str) -> Result<Option<MergeListing>> {
        Ok(self.working.listings.get(listing_id).map(|l| MergeListing {
            id: l.record.id.clone(),
            is_active: l.is_active,
            dedup_group_id: l.dedup_group_id.clone(),
            first_seen_at: l.first_seen_at,
            last_seen_at: l.last_seen_at,
            details: l.details(),
        }))
    }

    async fn reassign_sources(&mut self, from_listing_id: &str, to_listing_id: &str) -> Result<u64> {
        self.check_writable(from_listing_id)?;
        self.check_writable(to_listing_id)?;
        let mut moved = 0;
        for source in self
            .working
            .sources
            .iter_mut()
            .filter(|s| s.listing_id == from_listing_id)
        {
            source.listing_id = to_listing_id.to_string();
            moved += 1;
        }
        Ok(moved)
    }

    async fn deactivate_listing(&mut self, listing_id: &str) -> Result<()> {
        self.check_writable(listing_id)?;
        self.listing_mut(listing_id)?.is_active = false;
        Ok(())
    }

    async fn mark_candidate_merged(
        &mut self,
        listing_id_a: &str,
        listing_id_b: &str,
        resolved_by: &str,
    ) -> Result<bool> {
        let (first, second) = canonical_pair(listing_id_a, listing_id_b);
        match self
            .working
            .candidates
            .get_mut(&(first.to_string(), second.to_string()))
        {
            Some(c) => {
                let now = Utc::now();
                c.status = CandidateStatus::Merged;
                c.resolved_by = Some(resolved_by.to_string());
                c.resolved_at = Some(now);
                c.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_backfill(
        &mut self,
        listing_id: &str,
        details: &ListingDetails,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let listing = self.listing_mut(listing_id)?;
        let mut merged = listing.details();
        merged.backfill_from(details);
        listing.set_details(merged);
        listing.last_seen_at = listing.last_seen_at.max(last_seen_at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
