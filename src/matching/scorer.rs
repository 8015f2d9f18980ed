// src/matching/scorer.rs

use log::{debug, warn};
use rayon::prelude::*;

use crate::matching::blocking::CandidatePairs;
use crate::matching::prepared::PreparedListing;
use crate::matching::similarity::{jaccard, jaro_winkler, numeric_match};
use crate::models::matching::FieldScores;
use crate::utils::dedup_config::DedupConfig;

/// Fuzzy string fields count as matched from this score up.
pub const FUZZY_MATCH_BAR: f64 = 0.8;
/// Token-overlap fields count as matched strictly above this score.
pub const TOKEN_OVERLAP_MATCH_BAR: f64 = 0.5;

/// Matched-field entry recorded when the two listings come from different platforms.
pub const CROSS_SOURCE_SIGNAL: &str = "crossSource";

/// Composite similarity of two listings.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScore {
    /// Weighted sum plus any cross-source bonus, capped at 1.0.
    pub score: f64,
    /// Weighted sum before the cross-source bonus.
    pub base_score: f64,
    pub field_scores: FieldScores,
    pub matched_fields: Vec<&'static str>,
    pub cross_source: bool,
}

impl PairScore {
    pub fn matched_fields_owned(&self) -> Vec<String> {
        self.matched_fields.iter().map(|f| f.to_string()).collect()
    }
}

/// A scored candidate pair, by index into the prepared listing slice (`a < b`).
#[derive(Debug, Clone)]
pub struct ScoredPair {
    pub a: usize,
    pub b: usize,
    pub score: PairScore,
}

fn fuzzy(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        0.0
    } else {
        jaro_winkler(a, b)
    }
}

fn same_value(a: &str, b: &str) -> f64 {
    if !a.is_empty() && a == b {
        1.0
    } else {
        0.0
    }
}

fn is_cross_source(a: &PreparedListing<'_>, b: &PreparedListing<'_>) -> bool {
    match (
        a.record.source_platform.as_deref().map(str::trim),
        b.record.source_platform.as_deref().map(str::trim),
    ) {
        (Some(pa), Some(pb)) if !pa.is_empty() && !pb.is_empty() => !pa.eq_ignore_ascii_case(pb),
        _ => false,
    }
}

/// Scores one pair. Symmetric: `score_pair(a, b, c) == score_pair(b, a, c)`.
pub fn score_pair(a: &PreparedListing<'_>, b: &PreparedListing<'_>, config: &DedupConfig) -> PairScore {
    let weights = &config.weights;

    let title = fuzzy(&a.title, &b.title);
    let business_name = fuzzy(&a.business_name, &b.business_name);
    let asking_price = numeric_match(a.record.asking_price, b.record.asking_price, config.price_tolerance);
    let revenue = numeric_match(a.record.revenue, b.record.revenue, config.revenue_tolerance);
    let cash_flow = numeric_match(a.record.cash_flow, b.record.cash_flow, config.cash_flow_tolerance);
    let location = same_value(&a.city, &b.city) * same_value(&a.state, &b.state);
    let industry = same_value(&a.industry, &b.industry);
    let broker_name = fuzzy(&a.broker_name, &b.broker_name);
    let description = jaccard(&a.description_tokens, &b.description_tokens);

    let base_score = title * weights.title
        + business_name * weights.business_name
        + asking_price * weights.asking_price
        + revenue * weights.revenue
        + cash_flow * weights.cash_flow
        + location * weights.location
        + industry * weights.industry
        + broker_name * weights.broker_name
        + description * weights.description;

    let mut matched_fields = Vec::new();
    if title >= FUZZY_MATCH_BAR {
        matched_fields.push("title");
    }
    if business_name >= FUZZY_MATCH_BAR {
        matched_fields.push("businessName");
    }
    if asking_price > 0.0 {
        matched_fields.push("askingPrice");
    }
    if revenue > 0.0 {
        matched_fields.push("revenue");
    }
    if cash_flow > 0.0 {
        matched_fields.push("cashFlow");
    }
    if location > 0.0 {
        matched_fields.push("location");
    }
    if industry > 0.0 {
        matched_fields.push("industry");
    }
    if broker_name >= FUZZY_MATCH_BAR {
        matched_fields.push("brokerName");
    }
    if description > TOKEN_OVERLAP_MATCH_BAR {
        matched_fields.push("description");
    }

    let cross_source = is_cross_source(a, b);
    let score = if cross_source {
        matched_fields.push(CROSS_SOURCE_SIGNAL);
        (base_score + config.cross_source_bonus).min(1.0)
    } else {
        base_score.min(1.0)
    };

    PairScore {
        score,
        base_score,
        field_scores: FieldScores {
            name: business_name,
            location,
            price: asking_price,
            revenue,
            description,
        },
        matched_fields,
        cross_source,
    }
}

/// Scores every blocked pair in parallel. Output order follows the candidate pair order.
pub fn score_candidates(
    listings: &[PreparedListing<'_>],
    candidates: &CandidatePairs,
    config: &DedupConfig,
) -> Vec<ScoredPair> {
    let pairs: Vec<(usize, usize)> = candidates.pairs().collect();
    debug!(
        "Scoring {} candidate pairs on {} threads",
        pairs.len(),
        config.scoring_threads
    );

    let score_all = || -> Vec<ScoredPair> {
        pairs
            .par_iter()
            .map(|&(a, b)| ScoredPair {
                a,
                b,
                score: score_pair(&listings[a], &listings[b], config),
            })
            .collect()
    };

    match rayon::ThreadPoolBuilder::new()
        .num_threads(config.scoring_threads.max(1))
        .build()
    {
        Ok(pool) => pool.install(score_all),
        Err(e) => {
            warn!("Could not build scoring thread pool ({}), using the global pool", e);
            score_all()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::prepared::{prepare_all, PreparedListing};
    use crate::models::core::ListingRecord;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn denver(id: &str, title: &str, name: &str, price: f64, platform: &str) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            title: Some(title.to_string()),
            business_name: Some(name.to_string()),
            asking_price: Some(price),
            revenue: Some(1_200_000.0),
            cash_flow: Some(240_000.0),
            city: Some("Denver".to_string()),
            state: Some("CO".to_string()),
            industry: Some("Electrical Contractors".to_string()),
            broker_name: Some("Pat Rivera".to_string()),
            description: Some(
                "Licensed commercial electrical contractor serving the Denver metro area".to_string(),
            ),
            source_platform: Some(platform.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_blocking_scenario_scores_above_candidate_threshold() {
        let records = vec![
            ListingRecord {
                id: "a".to_string(),
                title: Some("Denver Electrical Co for Sale".to_string()),
                business_name: Some("Denver Electrical Co".to_string()),
                city: Some("Denver".to_string()),
                state: Some("CO".to_string()),
                asking_price: Some(500_000.0),
                ..Default::default()
            },
            ListingRecord {
                id: "b".to_string(),
                title: Some("Denver Electrical Company — For Sale".to_string()),
                business_name: Some("Denver Electrical Company".to_string()),
                city: Some("Denver".to_string()),
                state: Some("CO".to_string()),
                asking_price: Some(510_000.0),
                ..Default::default()
            },
        ];
        let prepared = prepare_all(&records);
        let result = score_pair(&prepared[0], &prepared[1], &DedupConfig::default());

        assert!(result.score >= 0.50, "score was {}", result.score);
        for field in ["title", "businessName", "askingPrice", "location"] {
            assert!(result.matched_fields.contains(&field), "missing {}", field);
        }
        assert_eq!(result.field_scores.name, 1.0);
        assert_eq!(result.field_scores.price, 1.0);
        assert_eq!(result.field_scores.location, 1.0);
        assert!(!result.cross_source);
    }

    #[test]
    fn test_cross_source_bonus_is_exactly_ten_points() {
        let same = vec![
            denver("a", "Denver Electrical Contractor", "Denver Electrical", 500_000.0, "BIZBUYSELL"),
            denver("b", "Electrical Contractor in Denver", "Mile High Electric", 800_000.0, "BIZBUYSELL"),
        ];
        let cross = vec![
            denver("a", "Denver Electrical Contractor", "Denver Electrical", 500_000.0, "BIZBUYSELL"),
            denver("b", "Electrical Contractor in Denver", "Mile High Electric", 800_000.0, "LOOPNET"),
        ];
        let config = DedupConfig::default();
        let same_prepared = prepare_all(&same);
        let cross_prepared = prepare_all(&cross);

        let same_score = score_pair(&same_prepared[0], &same_prepared[1], &config);
        let cross_score = score_pair(&cross_prepared[0], &cross_prepared[1], &config);

        assert!(same_score.score < 0.9);
        assert!(approx(cross_score.score, same_score.score + 0.10));
        assert!(cross_score.matched_fields.contains(&CROSS_SOURCE_SIGNAL));
        assert!(!same_score.matched_fields.contains(&CROSS_SOURCE_SIGNAL));
    }

    #[test]
    fn test_cross_source_bonus_is_capped_at_one() {
        let records = vec![
            denver("a", "Denver Electrical", "Denver Electrical", 500_000.0, "BIZBUYSELL"),
            denver("b", "Denver Electrical", "Denver Electrical", 500_000.0, "LOOPNET"),
        ];
        let prepared = prepare_all(&records);
        let result = score_pair(&prepared[0], &prepared[1], &DedupConfig::default());
        assert!(approx(result.base_score, 1.0));
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_score_is_symmetric() {
        let records = vec![
            denver("a", "Denver Electrical Co for Sale", "Denver Electrical Co", 500_000.0, "BIZBUYSELL"),
            denver("b", "Electrical contracting firm, Denver", "DEC Holdings", 530_000.0, "LOOPNET"),
            ListingRecord {
                id: "c".to_string(),
                title: Some("Boulder Bakery".to_string()),
                asking_price: Some(520_000.0),
                ..Default::default()
            },
        ];
        let prepared: Vec<PreparedListing<'_>> = prepare_all(&records);
        let config = DedupConfig::default();
        for i in 0..prepared.len() {
            for j in 0..prepared.len() {
                let forward = score_pair(&prepared[i], &prepared[j], &config);
                let backward = score_pair(&prepared[j], &prepared[i], &config);
                assert_eq!(forward, backward);
            }
        }
    }

    #[test]
    fn test_missing_fields_contribute_nothing() {
        let records = vec![
            ListingRecord {
                id: "a".to_string(),
                ..Default::default()
            },
            ListingRecord {
                id: "b".to_string(),
                ..Default::default()
            },
        ];
        let prepared = prepare_all(&records);
        let result = score_pair(&prepared[0], &prepared[1], &DedupConfig::default());
        assert_eq!(result.score, 0.0);
        assert!(result.matched_fields.is_empty());
    }
}
