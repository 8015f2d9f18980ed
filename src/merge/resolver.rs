// src/merge/resolver.rs

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::errors::DedupError;
use crate::models::stats_models::MergeOutcome;
use crate::store::{DedupStore, UnitOfWork};

/// Resolver identity recorded for merges triggered by a person.
pub const MANUAL_RESOLVER: &str = "manual";
/// Resolver identity recorded for merges performed by the auto-merge sweep.
pub const AUTO_MERGE_RESOLVER: &str = "auto-merge";

/// Collapses `secondary_id` into `primary_id` inside one unit of work.
///
/// Provenance rows move to the primary, the secondary is deactivated, both end up
/// in one group whose primary is `primary_id`, the pair's candidate row (if any) is
/// marked `MERGED`, and the primary's null fields are backfilled from the secondary.
/// Nothing is written if any step fails.
pub async fn merge_listings<S>(
    store: &S,
    primary_id: &str,
    secondary_id: &str,
    resolved_by: &str,
) -> Result<MergeOutcome>
where
    S: DedupStore + ?Sized,
{
    if primary_id == secondary_id {
        return Err(DedupError::SelfMerge(primary_id.to_string()).into());
    }

    let mut uow = store
        .begin()
        .await
        .context("Failed to begin merge unit of work")?;

    match apply_merge(uow.as_mut(), primary_id, secondary_id, resolved_by).await {
        Ok(outcome) => {
            uow.commit()
                .await
                .context(format!("Failed to commit merge of {} into {}", secondary_id, primary_id))?;
            info!(
                "Merged listing {} into {} (group {}, {} sources moved, {} fields backfilled)",
                secondary_id,
                primary_id,
                outcome.group_id,
                outcome.sources_reassigned,
                outcome.fields_backfilled.len()
            );
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(
                    "Rollback after failed merge of {} into {} also failed: {:#}",
                    secondary_id, primary_id, rollback_err
                );
            }
            Err(e)
        }
    }
}

async fn apply_merge(
    uow: &mut dyn UnitOfWork,
    primary_id: &str,
    secondary_id: &str,
    resolved_by: &str,
) -> Result<MergeOutcome> {
    let primary = uow
        .load_merge_listing(primary_id)
        .await?
        .ok_or_else(|| DedupError::ListingNotFound(primary_id.to_string()))?;
    let secondary = uow
        .load_merge_listing(secondary_id)
        .await?
        .ok_or_else(|| DedupError::ListingNotFound(secondary_id.to_string()))?;

    if !primary.is_active {
        warn!("Merge primary {} is inactive", primary_id);
    }
    if !secondary.is_active {
        debug!("Merge secondary {} was already inactive", secondary_id);
    }

    let sources_reassigned = uow.reassign_sources(secondary_id, primary_id).await?;
    uow.deactivate_listing(secondary_id).await?;

    let group_id = match (&primary.dedup_group_id, &secondary.dedup_group_id) {
        (Some(group), _) | (None, Some(group)) => group.clone(),
        (None, None) => uow.create_group(Some(primary_id)).await?,
    };
    if primary.dedup_group_id.as_deref() != Some(group_id.as_str()) {
        uow.set_listing_group(primary_id, &group_id).await?;
    }
    if secondary.dedup_group_id.as_deref() != Some(group_id.as_str()) {
        uow.set_listing_group(secondary_id, &group_id).await?;
    }
    uow.set_group_primary(&group_id, primary_id).await?;

    let candidate_marked = uow
        .mark_candidate_merged(primary_id, secondary_id, resolved_by)
        .await?;
    if !candidate_marked {
        debug!(
            "No candidate row for ({}, {}); merge proceeds without one",
            primary_id, secondary_id
        );
    }

    let mut preview = primary.details.clone();
    let fields_backfilled = preview.backfill_from(&secondary.details);
    let last_seen_at = primary.last_seen_at.max(secondary.last_seen_at);
    uow.apply_backfill(primary_id, &secondary.details, last_seen_at)
        .await?;

    Ok(MergeOutcome {
        primary_id: primary_id.to_string(),
        secondary_id: secondary_id.to_string(),
        group_id,
        sources_reassigned,
        fields_backfilled,
        candidate_marked,
    })
}
