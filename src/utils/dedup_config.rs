// src/utils/dedup_config.rs

use anyhow::Result;
use log::{info, warn};
use std::env;

use crate::errors::DedupError;

pub const DEFAULT_CANDIDATE_THRESHOLD: f64 = 0.50;
pub const DEFAULT_AUTO_MERGE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 100;
pub const DEFAULT_PRICE_BLOCK_TOLERANCE: f64 = 0.10;
pub const DEFAULT_MIN_SHARED_TITLE_TOKENS: usize = 3;
pub const DEFAULT_MIN_BUSINESS_NAME_LEN: usize = 3;
pub const DEFAULT_CROSS_SOURCE_BONUS: f64 = 0.10;
pub const PRICE_TOLERANCE: f64 = 0.05;
pub const REVENUE_TOLERANCE: f64 = 0.10;
pub const CASH_FLOW_TOLERANCE: f64 = 0.10;

/// Weight of each field in the composite pair score. Sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeights {
    pub title: f64,
    pub business_name: f64,
    pub asking_price: f64,
    pub revenue: f64,
    pub cash_flow: f64,
    pub location: f64,
    pub industry: f64,
    pub broker_name: f64,
    pub description: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 0.25,
            business_name: 0.15,
            asking_price: 0.20,
            revenue: 0.10,
            cash_flow: 0.05,
            location: 0.10,
            industry: 0.05,
            broker_name: 0.05,
            description: 0.05,
        }
    }
}

impl FieldWeights {
    pub fn total(&self) -> f64 {
        self.title
            + self.business_name
            + self.asking_price
            + self.revenue
            + self.cash_flow
            + self.location
            + self.industry
            + self.broker_name
            + self.description
    }
}

/// Immutable settings for one engine. Every threshold and weight lives here
/// so tests can run with overridden values.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub candidate_threshold: f64,
    pub auto_merge_threshold: f64,
    pub max_block_size: usize,
    pub price_block_tolerance: f64,
    pub min_shared_title_tokens: usize,
    pub min_business_name_len: usize,
    pub cross_source_bonus: f64,
    pub price_tolerance: f64,
    pub revenue_tolerance: f64,
    pub cash_flow_tolerance: f64,
    pub weights: FieldWeights,
    pub scoring_threads: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            candidate_threshold: DEFAULT_CANDIDATE_THRESHOLD,
            auto_merge_threshold: DEFAULT_AUTO_MERGE_THRESHOLD,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            price_block_tolerance: DEFAULT_PRICE_BLOCK_TOLERANCE,
            min_shared_title_tokens: DEFAULT_MIN_SHARED_TITLE_TOKENS,
            min_business_name_len: DEFAULT_MIN_BUSINESS_NAME_LEN,
            cross_source_bonus: DEFAULT_CROSS_SOURCE_BONUS,
            price_tolerance: PRICE_TOLERANCE,
            revenue_tolerance: REVENUE_TOLERANCE,
            cash_flow_tolerance: CASH_FLOW_TOLERANCE,
            weights: FieldWeights::default(),
            scoring_threads: num_cpus::get(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring unparseable value '{}' for {}", value, key);
                default
            }
        },
        None => default,
    }
}

impl DedupConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key);

        Self {
            candidate_threshold: parse_or(
                get("DEDUP_CANDIDATE_THRESHOLD"),
                "DEDUP_CANDIDATE_THRESHOLD",
                defaults.candidate_threshold,
            ),
            auto_merge_threshold: parse_or(
                get("DEDUP_AUTO_MERGE_THRESHOLD"),
                "DEDUP_AUTO_MERGE_THRESHOLD",
                defaults.auto_merge_threshold,
            ),
            max_block_size: parse_or(
                get("DEDUP_MAX_BLOCK_SIZE"),
                "DEDUP_MAX_BLOCK_SIZE",
                defaults.max_block_size,
            ),
            price_block_tolerance: parse_or(
                get("DEDUP_PRICE_BLOCK_TOLERANCE"),
                "DEDUP_PRICE_BLOCK_TOLERANCE",
                defaults.price_block_tolerance,
            ),
            min_shared_title_tokens: parse_or(
                get("DEDUP_MIN_SHARED_TITLE_TOKENS"),
                "DEDUP_MIN_SHARED_TITLE_TOKENS",
                defaults.min_shared_title_tokens,
            ),
            cross_source_bonus: parse_or(
                get("DEDUP_CROSS_SOURCE_BONUS"),
                "DEDUP_CROSS_SOURCE_BONUS",
                defaults.cross_source_bonus,
            ),
            scoring_threads: parse_or(
                get("DEDUP_SCORING_THREADS"),
                "DEDUP_SCORING_THREADS",
                defaults.scoring_threads,
            ),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("candidate_threshold", self.candidate_threshold),
            ("auto_merge_threshold", self.auto_merge_threshold),
            ("price_block_tolerance", self.price_block_tolerance),
            ("cross_source_bonus", self.cross_source_bonus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DedupError::InvalidConfig {
                    field,
                    reason: format!("{} is outside [0, 1]", value),
                }
                .into());
            }
        }
        if self.max_block_size < 2 {
            return Err(DedupError::InvalidConfig {
                field: "max_block_size",
                reason: "a block needs room for at least one pair".to_string(),
            }
            .into());
        }
        if self.min_shared_title_tokens == 0 {
            return Err(DedupError::InvalidConfig {
                field: "min_shared_title_tokens",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        let total = self.weights.total();
        if (total - 1.0).abs() > 1e-6 {
            return Err(DedupError::InvalidConfig {
                field: "weights",
                reason: format!("weights sum to {:.4}, expected 1.0", total),
            }
            .into());
        }
        Ok(())
    }

    pub fn log_config(&self) {
        info!("🔧 Deduplication configuration:");
        info!("   Candidate threshold: {:.2}", self.candidate_threshold);
        info!("   Auto-merge threshold: {:.2}", self.auto_merge_threshold);
        info!(
            "   Blocking: max block size {}, price tolerance {:.0}%, min shared title tokens {}",
            self.max_block_size,
            self.price_block_tolerance * 100.0,
            self.min_shared_title_tokens
        );
        info!("   Cross-source bonus: {:.2}", self.cross_source_bonus);
        info!("   Scoring threads: {}", self.scoring_threads);
        if self.auto_merge_threshold < self.candidate_threshold {
            warn!(
                "   Auto-merge threshold {:.2} is below the candidate threshold {:.2}",
                self.auto_merge_threshold, self.candidate_threshold
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((FieldWeights::default().total() - 1.0).abs() < 1e-9);
        assert!(DedupConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DEDUP_CANDIDATE_THRESHOLD", "0.6"),
            ("DEDUP_AUTO_MERGE_THRESHOLD", "0.9"),
            ("DEDUP_MAX_BLOCK_SIZE", "25"),
            ("DEDUP_SCORING_THREADS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = DedupConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.candidate_threshold, 0.6);
        assert_eq!(config.auto_merge_threshold, 0.9);
        assert_eq!(config.max_block_size, 25);
        assert_eq!(config.scoring_threads, num_cpus::get());
        assert_eq!(config.min_shared_title_tokens, DEFAULT_MIN_SHARED_TITLE_TOKENS);
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("DEDUP_CROSS_SOURCE_BONUS", "0.2");
        let config = DedupConfig::from_env();
        assert_eq!(config.cross_source_bonus, 0.2);
        env::remove_var("DEDUP_CROSS_SOURCE_BONUS");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = DedupConfig {
            candidate_threshold: 1.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DedupError>(),
            Some(DedupError::InvalidConfig { field: "candidate_threshold", .. })
        ));

        let config = DedupConfig {
            weights: FieldWeights {
                title: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DedupConfig {
            max_block_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
