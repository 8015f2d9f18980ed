// src/matching/manager.rs - Entry points of the deduplication engine

use anyhow::Result;
use chrono::{Duration, Utc};
use indicatif::MultiProgress;
use log::{debug, info, warn};
use std::time::Instant;

use crate::clustering::clusters::{build_clusters, Cluster};
use crate::clustering::persist::persist_cluster;
use crate::errors::DedupError;
use crate::matching::blocking::build_candidate_pairs;
use crate::matching::prepared::prepare_all;
use crate::matching::scorer::score_candidates;
use crate::merge::auto_merge::auto_merge;
use crate::merge::resolver::{merge_listings, MANUAL_RESOLVER};
use crate::models::matching::DedupCandidate;
use crate::models::stats_models::{AutoMergeSummary, DedupRunResult, MergeOutcome, ScoringStats};
use crate::store::DedupStore;
use crate::utils::dedup_config::DedupConfig;
use crate::utils::get_memory_usage;
use crate::utils::platform_filter::PlatformFilterConfig;
use crate::utils::progress_config::{phase_bar, ProgressConfig};

pub struct DedupEngine<S: DedupStore> {
    store: S,
    config: DedupConfig,
    platform_filter: PlatformFilterConfig,
    progress: ProgressConfig,
    multi_progress: Option<MultiProgress>,
}

impl<S: DedupStore> DedupEngine<S> {
    /// Engine with no platform filter and progress bars off.
    pub fn new(store: S, config: DedupConfig) -> Self {
        Self {
            store,
            config,
            platform_filter: PlatformFilterConfig::default(),
            progress: ProgressConfig {
                enabled: false,
                ..Default::default()
            },
            multi_progress: None,
        }
    }

    pub fn with_platform_filter(mut self, platform_filter: PlatformFilterConfig) -> Self {
        self.platform_filter = platform_filter;
        self
    }

    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.multi_progress = progress.create_multi_progress();
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Full sweep over every active, non-hidden listing.
    pub async fn run_deduplication(&self) -> DedupRunResult {
        self.run_with_lock(None).await
    }

    /// Like `run_deduplication`, but only pairs with at least one member created in the
    /// last `days` days are scored. Blocking still sees the full active set.
    pub async fn run_recent_deduplication(&self, days: u32) -> DedupRunResult {
        self.run_with_lock(Some(days)).await
    }

    /// Persisted candidates touching `listing_id`, highest score first.
    pub async fn find_duplicates_for_listing(&self, listing_id: &str) -> Result<Vec<DedupCandidate>> {
        self.store.find_candidates_for_listing(listing_id).await
    }

    /// Manual merge of `secondary_id` into `primary_id`.
    pub async fn merge_duplicates(&self, primary_id: &str, secondary_id: &str) -> Result<MergeOutcome> {
        merge_listings(&self.store, primary_id, secondary_id, MANUAL_RESOLVER).await
    }

    /// Manual review outcome: the pair is not a duplicate.
    pub async fn reject_candidate(&self, listing_id_a: &str, listing_id_b: &str, resolved_by: &str) -> Result<bool> {
        let rejected = self
            .store
            .reject_candidate(listing_id_a, listing_id_b, resolved_by)
            .await?;
        if rejected {
            info!("Candidate ({}, {}) rejected by {}", listing_id_a, listing_id_b, resolved_by);
        } else {
            warn!(
                "No pending candidate for ({}, {}); nothing rejected",
                listing_id_a, listing_id_b
            );
        }
        Ok(rejected)
    }

    /// Auto-merge sweep. Returns the number of merges performed.
    pub async fn auto_merge_candidates(&self, threshold: Option<f64>) -> Result<usize> {
        Ok(self.auto_merge_summary(threshold).await?.merged)
    }

    /// Auto-merge sweep with skip and failure counts.
    pub async fn auto_merge_summary(&self, threshold: Option<f64>) -> Result<AutoMergeSummary> {
        let threshold = threshold.unwrap_or(self.config.auto_merge_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DedupError::InvalidConfig {
                field: "auto_merge_threshold",
                reason: format!("{} is outside [0, 1]", threshold),
            }
            .into());
        }
        if !self.store.try_acquire_run_lock().await? {
            return Err(DedupError::LockUnavailable.into());
        }

        let start = Instant::now();
        let pb = phase_bar(&self.multi_progress, 0, "Auto-merging candidates");
        let result = auto_merge(&self.store, threshold, pb).await;

        if let Err(e) = self.store.release_run_lock().await {
            warn!("Failed to release run lock after auto-merge: {:#}", e);
        }
        let summary = result?;

        info!("=== Auto-Merge Summary ===");
        info!("  Threshold: {:.2}", threshold);
        info!("  Candidates considered: {}", summary.candidates_considered);
        info!("  Merged: {}", summary.merged);
        info!("  Skipped (already merged this sweep): {}", summary.skipped_already_merged);
        info!("  Skipped (inactive member): {}", summary.skipped_inactive);
        info!("  Failed: {}", summary.failed);
        info!("  Duration: {:.2?}", start.elapsed());
        Ok(summary)
    }

    async fn run_with_lock(&self, recent_days: Option<u32>) -> DedupRunResult {
        let mut result = DedupRunResult::default();
        match self.store.try_acquire_run_lock().await {
            Ok(true) => {}
            Ok(false) => {
                result.push_fatal(DedupError::LockUnavailable);
                return result;
            }
            Err(e) => {
                result.push_fatal(format!("could not acquire run lock: {:#}", e));
                return result;
            }
        }

        self.run(recent_days, &mut result).await;

        if let Err(e) = self.store.release_run_lock().await {
            warn!("Failed to release run lock: {:#}", e);
        }
        result
    }

    async fn run(&self, recent_days: Option<u32>, result: &mut DedupRunResult) {
        let start = Instant::now();
        let mut stats = ScoringStats::default();
        match recent_days {
            Some(days) => info!("🚀 Starting recent deduplication run (last {} days)", days),
            None => info!("🚀 Starting full deduplication run"),
        }

        // Phase 1: snapshot
        let mut records = match self.store.load_active_listings().await {
            Ok(records) => records,
            Err(e) => {
                result.push_fatal(format!("failed to load active listings: {:#}", e));
                return;
            }
        };
        if self.platform_filter.is_active() {
            let before = records.len();
            records.retain(|r| self.platform_filter.allows(r.source_platform.as_deref()));
            info!(
                "Platform filter kept {} of {} listings",
                records.len(),
                before
            );
        }
        // Index order equals id order from here on.
        records.sort_by(|a, b| a.id.cmp(&b.id));
        stats.listings_loaded = records.len();
        info!("Loaded {} active listings", records.len());

        // Phase 2: blocking
        let prepared = prepare_all(&records);
        let mut candidates = build_candidate_pairs(&prepared, &self.config);
        if self.progress.should_show_detailed() {
            candidates.log_summary();
        }

        if let Some(days) = recent_days {
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            let recent: Vec<bool> = records.iter().map(|r| r.created_at >= cutoff).collect();
            let before = candidates.len();
            candidates.retain(|a, b| recent[a] || recent[b]);
            info!(
                "Recent filter: {} of {} listings created since {}, {} of {} pairs kept",
                recent.iter().filter(|&&r| r).count(),
                recent.len(),
                cutoff.format("%Y-%m-%d"),
                candidates.len(),
                before
            );
        }
        stats.pairs_blocked = candidates.len();

        // Phase 3: scoring
        let scoring_pb = phase_bar(&self.multi_progress, 1, "Scoring candidate pairs");
        let scored = score_candidates(&prepared, &candidates, &self.config);
        if let Some(pb) = scoring_pb {
            pb.finish_with_message(format!("Scored {} pairs", scored.len()));
        }
        stats.pairs_scored = scored.len();

        // Phase 4: clustering
        let clusters = build_clusters(&prepared, &scored, self.config.candidate_threshold);
        stats.clusters = clusters.len();
        stats.pairs_above_threshold = clusters.iter().map(|c| c.candidates.len()).sum();
        if stats.pairs_above_threshold > 0 {
            stats.avg_candidate_score = clusters
                .iter()
                .flat_map(|c| c.candidates.iter().map(|u| u.overall_score))
                .sum::<f64>()
                / stats.pairs_above_threshold as f64;
        }

        // Phase 5: persistence, one unit of work per cluster
        let persist_pb = phase_bar(
            &self.multi_progress,
            clusters.len() as u64,
            "Persisting clusters",
        );
        for cluster in &clusters {
            if let Err(e) = self.persist_one(cluster, result).await {
                result.push_fatal(e);
                break;
            }
            if let Some(pb) = &persist_pb {
                pb.inc(1);
            }
        }
        if let Some(pb) = persist_pb {
            pb.finish_with_message("Clusters persisted");
        }

        info!("=== Deduplication Summary ===");
        info!("  Listings loaded: {}", stats.listings_loaded);
        info!("  Candidate pairs blocked: {}", stats.pairs_blocked);
        info!("  Pairs scored: {}", stats.pairs_scored);
        info!(
            "  Pairs at or above {:.2}: {} (avg score {:.3})",
            self.config.candidate_threshold, stats.pairs_above_threshold, stats.avg_candidate_score
        );
        info!("  Clusters: {}", stats.clusters);
        info!("  Candidates written: {}", result.candidates_found);
        info!("  Groups created: {}", result.groups_created);
        info!("  Errors: {}", result.errors.len());
        info!("  Duration: {:.2?}", start.elapsed());
        if self.progress.should_show_memory() {
            info!("  Memory usage: {} MB", get_memory_usage().await);
        }
    }

    /// Persists one cluster atomically. `Err` carries the fatal message; per-pair
    /// failures are appended to `result.errors`.
    async fn persist_one(&self, cluster: &Cluster, result: &mut DedupRunResult) -> Result<(), String> {
        let mut uow = self
            .store
            .begin()
            .await
            .map_err(|e| format!("failed to begin unit of work: {:#}", e))?;

        match persist_cluster(uow.as_mut(), cluster).await {
            Ok(outcome) => {
                uow.commit().await.map_err(|e| {
                    format!(
                        "failed to commit cluster starting at {}: {:#}",
                        cluster.members[0], e
                    )
                })?;
                debug!(
                    "Cluster of {} persisted in group {} ({} inserted, {} updated, {} merged rows kept)",
                    cluster.size(),
                    outcome.group_id,
                    outcome.inserted,
                    outcome.updated,
                    outcome.skipped_merged
                );
                result.candidates_found += outcome.candidates_written();
                if outcome.group_created {
                    result.groups_created += 1;
                }
                result.errors.extend(outcome.errors);
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!("Rollback of failed cluster also failed: {:#}", rollback_err);
                }
                Err(format!(
                    "failed to persist cluster starting at {}: {:#}",
                    cluster.members[0], e
                ))
            }
        }
    }
}
