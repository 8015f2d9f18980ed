// src/clustering/persist.rs

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::clustering::clusters::Cluster;
use crate::store::{UnitOfWork, UpsertOutcome};

/// What persisting one cluster wrote.
#[derive(Debug, Clone, Default)]
pub struct ClusterPersistOutcome {
    pub group_id: String,
    pub group_created: bool,
    pub members_assigned: u64,
    pub inserted: usize,
    pub updated: usize,
    pub skipped_merged: usize,
    /// Per-pair upsert failures. The rest of the cluster is still written.
    pub errors: Vec<String>,
}

impl ClusterPersistOutcome {
    pub fn candidates_written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Writes one cluster through `uow`: resolves or creates its group, assigns the
/// group to unassigned members and upserts every qualifying pair.
///
/// Group failures are returned as `Err` and the caller must roll back; upsert
/// failures are collected in the outcome.
pub async fn persist_cluster(uow: &mut dyn UnitOfWork, cluster: &Cluster) -> Result<ClusterPersistOutcome> {
    let mut outcome = ClusterPersistOutcome::default();

    let current = uow
        .group_ids_for(&cluster.members)
        .await
        .context("Failed to read current groups of cluster members")?;

    // Members come sorted by id, so the first existing group wins deterministically.
    let existing = current.iter().find_map(|(_, group)| group.clone());
    outcome.group_id = match existing {
        Some(group_id) => group_id,
        None => {
            outcome.group_created = true;
            uow.create_group(None)
                .await
                .context("Failed to create dedup group for cluster")?
        }
    };

    let conflicting = current
        .iter()
        .filter(|(_, group)| group.as_deref().is_some_and(|g| g != outcome.group_id))
        .count();
    if conflicting > 0 {
        debug!(
            "Cluster of {} bridges {} listing(s) already in other groups; their assignment is kept",
            cluster.size(),
            conflicting
        );
    }

    outcome.members_assigned = uow
        .assign_group_if_unset(&cluster.members, &outcome.group_id)
        .await
        .context("Failed to assign dedup group to cluster members")?;

    for candidate in &cluster.candidates {
        match uow.upsert_candidate(candidate).await {
            Ok(UpsertOutcome::Inserted) => outcome.inserted += 1,
            Ok(UpsertOutcome::Updated) => outcome.updated += 1,
            Ok(UpsertOutcome::SkippedMerged) => outcome.skipped_merged += 1,
            Err(e) => {
                warn!(
                    "Candidate upsert failed for ({}, {}): {:#}",
                    candidate.listing_id_1, candidate.listing_id_2, e
                );
                outcome.errors.push(format!(
                    "candidate ({}, {}): {:#}",
                    candidate.listing_id_1, candidate.listing_id_2, e
                ));
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::ListingRecord;
    use crate::models::matching::{CandidateUpsert, FieldScores};
    use crate::store::memory::MemoryStore;
    use crate::store::DedupStore;

    async fn store_with(ids: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for id in ids {
            store
                .insert_listing(ListingRecord {
                    id: id.to_string(),
                    ..Default::default()
                })
                .await;
        }
        store
    }

    fn cluster(members: &[&str], pairs: &[(&str, &str)]) -> Cluster {
        Cluster {
            members: members.iter().map(|m| m.to_string()).collect(),
            candidates: pairs
                .iter()
                .map(|(a, b)| CandidateUpsert::new(a, b, 0.8, FieldScores::default(), vec![]))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_existing_group_is_reused_and_never_overwritten() {
        let store = store_with(&["a", "b", "c"]).await;
        let first = cluster(&["a", "b"], &[("a", "b")]);
        let mut uow = store.begin().await.unwrap();
        let outcome = persist_cluster(uow.as_mut(), &first).await.unwrap();
        uow.commit().await.unwrap();
        assert!(outcome.group_created);
        assert_eq!(outcome.members_assigned, 2);

        let grown = cluster(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let mut uow = store.begin().await.unwrap();
        let second = persist_cluster(uow.as_mut(), &grown).await.unwrap();
        uow.commit().await.unwrap();

        assert!(!second.group_created);
        assert_eq!(second.group_id, outcome.group_id);
        assert_eq!(second.members_assigned, 1);
        assert_eq!(second.inserted, 1);
        assert_eq!(second.updated, 1);
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.groups.len(), 1);
        assert!(snapshot
            .listings
            .values()
            .all(|l| l.dedup_group_id.as_deref() == Some(outcome.group_id.as_str())));
    }

    #[tokio::test]
    async fn test_failed_upsert_is_recorded_and_the_rest_is_written() {
        let store = store_with(&["a", "b", "c"]).await;
        store.fail_upserts_for("b", "c").await;

        let c = cluster(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let mut uow = store.begin().await.unwrap();
        let outcome = persist_cluster(uow.as_mut(), &c).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("(b, c)"));
        assert!(store.candidate("a", "b").await.is_some());
        assert!(store.candidate("b", "c").await.is_none());
        assert!(store.listing("c").await.unwrap().dedup_group_id.is_some());
    }
}
