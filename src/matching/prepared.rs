// src/matching/prepared.rs

use std::collections::HashSet;

use crate::matching::normalize::{
    normalize_business_name, normalize_state, normalize_text, normalize_zip, tokenize,
};
use crate::models::core::ListingRecord;

/// A listing with every normalized form blocking and scoring need, computed once per run.
/// Missing values are represented by empty strings / sets.
#[derive(Debug, Clone)]
pub struct PreparedListing<'a> {
    pub record: &'a ListingRecord,
    pub title: String,
    pub business_name: String,
    pub title_tokens: HashSet<String>,
    pub description_tokens: HashSet<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub broker_name: String,
    pub industry: String,
}

fn norm_opt(value: &Option<String>, f: fn(&str) -> String) -> String {
    value.as_deref().map(f).unwrap_or_default()
}

impl<'a> PreparedListing<'a> {
    pub fn new(record: &'a ListingRecord) -> Self {
        Self {
            record,
            title: norm_opt(&record.title, normalize_text),
            business_name: norm_opt(&record.business_name, normalize_business_name),
            title_tokens: record.title.as_deref().map(tokenize).unwrap_or_default(),
            description_tokens: record.description.as_deref().map(tokenize).unwrap_or_default(),
            city: norm_opt(&record.city, normalize_text),
            state: norm_opt(&record.state, normalize_state),
            zip: norm_opt(&record.zip_code, normalize_zip),
            broker_name: norm_opt(&record.broker_name, normalize_text),
            industry: norm_opt(&record.industry, normalize_text),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Positive, finite asking price, if any.
    pub fn asking_price(&self) -> Option<f64> {
        self.record
            .asking_price
            .filter(|p| p.is_finite() && *p > 0.0)
    }
}

pub fn prepare_all(records: &[ListingRecord]) -> Vec<PreparedListing<'_>> {
    records.iter().map(PreparedListing::new).collect()
}
