// src/merge/auto_merge.rs

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::merge::resolver::{merge_listings, AUTO_MERGE_RESOLVER};
use crate::models::core::ListingProvenance;
use crate::models::stats_models::AutoMergeSummary;
use crate::store::DedupStore;

/// Orders two listings by merge preference: more provenance rows first, then the
/// one seen first, then the lower id. Returns `(primary, secondary)`.
pub fn choose_primary<'a>(
    a: &'a ListingProvenance,
    b: &'a ListingProvenance,
) -> (&'a ListingProvenance, &'a ListingProvenance) {
    let a_wins = match b.source_count.cmp(&a.source_count) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => (a.first_seen_at, &a.listing_id) <= (b.first_seen_at, &b.listing_id),
    };
    if a_wins {
        (a, b)
    } else {
        (b, a)
    }
}

/// Merges every `PENDING` candidate scoring at least `threshold`, highest first.
///
/// A pair is skipped when either listing was already merged earlier in this sweep
/// or is no longer active. Failures are counted and logged; they never stop the sweep.
pub async fn auto_merge<S>(
    store: &S,
    threshold: f64,
    progress: Option<ProgressBar>,
) -> Result<AutoMergeSummary>
where
    S: DedupStore + ?Sized,
{
    let candidates = store
        .pending_candidates_above(threshold)
        .await
        .context("Failed to load pending candidates for auto-merge")?;

    info!(
        "Auto-merge: {} pending candidates at or above {:.2}",
        candidates.len(),
        threshold
    );
    if let Some(pb) = &progress {
        pb.set_length(candidates.len() as u64);
    }

    let mut summary = AutoMergeSummary {
        candidates_considered: candidates.len(),
        ..Default::default()
    };
    let mut merged_ids: HashSet<String> = HashSet::new();

    for candidate in &candidates {
        if let Some(pb) = &progress {
            pb.inc(1);
        }
        let (id_1, id_2) = (&candidate.listing_id_1, &candidate.listing_id_2);

        if merged_ids.contains(id_1) || merged_ids.contains(id_2) {
            debug!("Skipping ({}, {}): a member was merged earlier in this sweep", id_1, id_2);
            summary.skipped_already_merged += 1;
            continue;
        }

        let provenance = match (
            store.listing_provenance(id_1).await,
            store.listing_provenance(id_2).await,
        ) {
            (Ok(Some(p1)), Ok(Some(p2))) => (p1, p2),
            (Ok(_), Ok(_)) => {
                warn!("Skipping ({}, {}): listing no longer exists", id_1, id_2);
                summary.failed += 1;
                continue;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Skipping ({}, {}): provenance lookup failed: {:#}", id_1, id_2, e);
                summary.failed += 1;
                continue;
            }
        };

        if !provenance.0.is_active || !provenance.1.is_active {
            debug!("Skipping ({}, {}): a member is inactive", id_1, id_2);
            summary.skipped_inactive += 1;
            continue;
        }

        let (primary, secondary) = choose_primary(&provenance.0, &provenance.1);
        match merge_listings(store, &primary.listing_id, &secondary.listing_id, AUTO_MERGE_RESOLVER).await {
            Ok(_) => {
                summary.merged += 1;
                merged_ids.insert(id_1.clone());
                merged_ids.insert(id_2.clone());
            }
            Err(e) => {
                warn!(
                    "Auto-merge of {} into {} failed: {:#}",
                    secondary.listing_id, primary.listing_id, e
                );
                summary.failed += 1;
            }
        }
    }

    if let Some(pb) = &progress {
        pb.finish_with_message(format!("Auto-merge complete: {} merged", summary.merged));
    }
    Ok(summary)
}
