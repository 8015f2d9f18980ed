// src/models/matching.rs

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a candidate pair. `Merged` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateStatus {
    Pending,
    Merged,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "PENDING",
            CandidateStatus::Merged => "MERGED",
            CandidateStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for CandidateStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(CandidateStatus::Pending),
            "MERGED" => Ok(CandidateStatus::Merged),
            "REJECTED" => Ok(CandidateStatus::Rejected),
            other => Err(anyhow!("Unknown candidate status '{}'", other)),
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field sub-scores persisted alongside a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldScores {
    pub name: f64,
    pub location: f64,
    pub price: f64,
    pub revenue: f64,
    pub description: f64,
}

/// A persisted candidate pair. `listing_id_1 < listing_id_2` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCandidate {
    pub id: String,
    pub listing_id_1: String,
    pub listing_id_2: String,
    pub overall_score: f64,
    pub field_scores: FieldScores,
    pub matched_fields: Vec<String>,
    pub status: CandidateStatus,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DedupCandidate {
    pub fn involves(&self, listing_id: &str) -> bool {
        self.listing_id_1 == listing_id || self.listing_id_2 == listing_id
    }
}

/// A cluster of listings believed to describe the same business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupGroup {
    pub id: String,
    pub primary_listing_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert-or-update payload for one scored pair.
#[derive(Debug, Clone)]
pub struct CandidateUpsert {
    pub listing_id_1: String,
    pub listing_id_2: String,
    pub overall_score: f64,
    pub field_scores: FieldScores,
    pub matched_fields: Vec<String>,
}

impl CandidateUpsert {
    /// Builds an upsert with the pair stored in canonical (lower id first) order.
    pub fn new(
        id_a: &str,
        id_b: &str,
        overall_score: f64,
        field_scores: FieldScores,
        matched_fields: Vec<String>,
    ) -> Self {
        let (first, second) = canonical_pair(id_a, id_b);
        Self {
            listing_id_1: first.to_string(),
            listing_id_2: second.to_string(),
            overall_score,
            field_scores,
            matched_fields,
        }
    }
}

/// Orders an unordered pair of listing ids so the lower id comes first.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pair_orders_ids() {
        assert_eq!(canonical_pair("b", "a"), ("a", "b"));
        assert_eq!(canonical_pair("a", "b"), ("a", "b"));
        let upsert = CandidateUpsert::new("lst_9", "lst_1", 0.7, FieldScores::default(), vec![]);
        assert_eq!(upsert.listing_id_1, "lst_1");
        assert_eq!(upsert.listing_id_2, "lst_9");
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            CandidateStatus::Pending,
            CandidateStatus::Merged,
            CandidateStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<CandidateStatus>().unwrap(), status);
        }
        assert!("NOT_A_STATUS".parse::<CandidateStatus>().is_err());
    }
}
