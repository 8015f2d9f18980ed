// src/clustering/clusters.rs

use log::debug;
use std::collections::BTreeMap;

use crate::clustering::union_find::UnionFind;
use crate::matching::prepared::PreparedListing;
use crate::matching::scorer::ScoredPair;
use crate::models::matching::CandidateUpsert;

/// A connected component of qualifying pairs.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Member listing ids, ascending.
    pub members: Vec<String>,
    /// Every qualifying pair among the members, canonical and ascending.
    pub candidates: Vec<CandidateUpsert>,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Groups pairs scoring at least `threshold` into transitively connected clusters.
/// Listings without a qualifying pair are left out. Clusters come back ordered by
/// their smallest member id.
pub fn build_clusters(
    listings: &[PreparedListing<'_>],
    scored: &[ScoredPair],
    threshold: f64,
) -> Vec<Cluster> {
    let qualifying: Vec<&ScoredPair> = scored.iter().filter(|p| p.score.score >= threshold).collect();

    let mut uf = UnionFind::new(listings.len());
    for pair in &qualifying {
        uf.union(pair.a, pair.b);
    }

    let mut by_root: BTreeMap<usize, (Vec<usize>, Vec<&ScoredPair>)> = BTreeMap::new();
    for &pair in &qualifying {
        let root = uf.find(pair.a);
        let entry = by_root.entry(root).or_default();
        entry.0.push(pair.a);
        entry.0.push(pair.b);
        entry.1.push(pair);
    }

    let mut clusters: Vec<Cluster> = by_root
        .into_values()
        .map(|(member_indices, pairs)| {
            let mut members: Vec<String> = member_indices
                .into_iter()
                .map(|i| listings[i].id().to_string())
                .collect();
            members.sort();
            members.dedup();

            let mut candidates: Vec<CandidateUpsert> = pairs
                .into_iter()
                .map(|p| {
                    CandidateUpsert::new(
                        listings[p.a].id(),
                        listings[p.b].id(),
                        p.score.score,
                        p.score.field_scores,
                        p.score.matched_fields_owned(),
                    )
                })
                .collect();
            candidates.sort_by(|x, y| {
                (&x.listing_id_1, &x.listing_id_2).cmp(&(&y.listing_id_1, &y.listing_id_2))
            });

            Cluster { members, candidates }
        })
        .collect();
    clusters.sort_by(|x, y| x.members.first().cmp(&y.members.first()));

    debug!(
        "Built {} clusters from {} qualifying pairs (threshold {:.2})",
        clusters.len(),
        qualifying.len(),
        threshold
    );
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::prepared::prepare_all;
    use crate::matching::scorer::PairScore;
    use crate::models::core::ListingRecord;
    use crate::models::matching::FieldScores;

    fn records(ids: &[&str]) -> Vec<ListingRecord> {
        ids.iter()
            .map(|id| ListingRecord {
                id: id.to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn pair(a: usize, b: usize, score: f64) -> ScoredPair {
        ScoredPair {
            a,
            b,
            score: PairScore {
                score,
                base_score: score,
                field_scores: FieldScores::default(),
                matched_fields: vec!["title"],
                cross_source: false,
            },
        }
    }

    #[test]
    fn test_chain_forms_one_cluster_without_direct_pair() {
        let recs = records(&["a", "b", "c", "d"]);
        let prepared = prepare_all(&recs);
        let scored = vec![pair(0, 1, 0.9), pair(1, 2, 0.9), pair(2, 3, 0.2)];

        let clusters = build_clusters(&prepared, &scored, 0.5);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec!["a", "b", "c"]);
        assert_eq!(clusters[0].candidates.len(), 2);
    }

    #[test]
    fn test_separate_components_are_ordered_by_smallest_member() {
        let recs = records(&["a", "b", "c", "d", "e"]);
        let prepared = prepare_all(&recs);
        let scored = vec![pair(3, 4, 0.7), pair(0, 2, 0.6)];

        let clusters = build_clusters(&prepared, &scored, 0.5);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec!["a", "c"]);
        assert_eq!(clusters[1].members, vec!["d", "e"]);
    }

    #[test]
    fn test_raising_threshold_never_adds_candidates() {
        let recs = records(&["a", "b", "c", "d", "e", "f"]);
        let prepared = prepare_all(&recs);
        let scored = vec![
            pair(0, 1, 0.95),
            pair(1, 2, 0.55),
            pair(2, 3, 0.71),
            pair(3, 4, 0.50),
            pair(4, 5, 0.84),
            pair(0, 5, 0.31),
        ];

        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = step as f64 * 0.05;
            let surfaced: usize = build_clusters(&prepared, &scored, threshold)
                .iter()
                .map(|c| c.candidates.len())
                .sum();
            assert!(surfaced <= previous, "threshold {} surfaced {}", threshold, surfaced);
            previous = surfaced;
        }
    }
}
