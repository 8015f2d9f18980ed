// src/models/core.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only projection of a listing, loaded fresh for every run and used only for scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: Option<String>,
    pub business_name: Option<String>,
    pub asking_price: Option<f64>,
    pub revenue: Option<f64>,
    pub cash_flow: Option<f64>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub industry: Option<String>,
    pub broker_name: Option<String>,
    pub description: Option<String>,
    /// Platform of the earliest provenance row for this listing.
    pub source_platform: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Descriptive and financial fields the merge resolver may backfill on the primary listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingDetails {
    pub business_name: Option<String>,
    pub description: Option<String>,
    pub asking_price: Option<f64>,
    pub revenue: Option<f64>,
    pub cash_flow: Option<f64>,
    pub ebitda: Option<f64>,
    pub industry: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub broker_name: Option<String>,
    pub broker_company: Option<String>,
    pub year_established: Option<i32>,
    pub employees: Option<i32>,
}

fn fill_missing<T: Clone>(
    target: &mut Option<T>,
    source: &Option<T>,
    field: &'static str,
    filled: &mut Vec<&'static str>,
) {
    if target.is_none() {
        if let Some(value) = source {
            *target = Some(value.clone());
            filled.push(field);
        }
    }
}

impl ListingDetails {
    /// Copies values from `other` into fields that are still `None` here.
    /// Existing values are never replaced. Returns the names of the fields that were filled.
    pub fn backfill_from(&mut self, other: &ListingDetails) -> Vec<&'static str> {
        let mut filled = Vec::new();
        fill_missing(&mut self.business_name, &other.business_name, "business_name", &mut filled);
        fill_missing(&mut self.description, &other.description, "description", &mut filled);
        fill_missing(&mut self.asking_price, &other.asking_price, "asking_price", &mut filled);
        fill_missing(&mut self.revenue, &other.revenue, "revenue", &mut filled);
        fill_missing(&mut self.cash_flow, &other.cash_flow, "cash_flow", &mut filled);
        fill_missing(&mut self.ebitda, &other.ebitda, "ebitda", &mut filled);
        fill_missing(&mut self.industry, &other.industry, "industry", &mut filled);
        fill_missing(&mut self.city, &other.city, "city", &mut filled);
        fill_missing(&mut self.state, &other.state, "state", &mut filled);
        fill_missing(&mut self.zip_code, &other.zip_code, "zip_code", &mut filled);
        fill_missing(&mut self.broker_name, &other.broker_name, "broker_name", &mut filled);
        fill_missing(&mut self.broker_company, &other.broker_company, "broker_company", &mut filled);
        fill_missing(&mut self.year_established, &other.year_established, "year_established", &mut filled);
        fill_missing(&mut self.employees, &other.employees, "employees", &mut filled);
        filled
    }
}

/// Everything the merge resolver needs to know about one side of a merge.
#[derive(Debug, Clone)]
pub struct MergeListing {
    pub id: String,
    pub is_active: bool,
    pub dedup_group_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub details: ListingDetails,
}

/// Provenance summary used to pick the primary side of an automatic merge.
#[derive(Debug, Clone)]
pub struct ListingProvenance {
    pub listing_id: String,
    pub is_active: bool,
    pub source_count: i64,
    pub first_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_never_overwrites_existing_values() {
        let mut primary = ListingDetails {
            business_name: Some("Denver Electrical".to_string()),
            asking_price: Some(500_000.0),
            ..Default::default()
        };
        let secondary = ListingDetails {
            business_name: Some("Denver Electrical Company".to_string()),
            asking_price: Some(510_000.0),
            revenue: Some(1_200_000.0),
            broker_name: Some("Jane Broker".to_string()),
            ..Default::default()
        };

        let filled = primary.backfill_from(&secondary);

        assert_eq!(filled, vec!["revenue", "broker_name"]);
        assert_eq!(primary.business_name.as_deref(), Some("Denver Electrical"));
        assert_eq!(primary.asking_price, Some(500_000.0));
        assert_eq!(primary.revenue, Some(1_200_000.0));
        assert_eq!(primary.broker_name.as_deref(), Some("Jane Broker"));
    }

    #[test]
    fn test_backfill_with_empty_secondary_is_noop() {
        let mut primary = ListingDetails {
            city: Some("Denver".to_string()),
            ..Default::default()
        };
        let before = primary.clone();
        let filled = primary.backfill_from(&ListingDetails::default());
        assert!(filled.is_empty());
        assert_eq!(primary, before);
    }
}
