//! Source-platform filtering for deduplication runs.
//! Restricts a run to listings first seen on one of the configured platforms.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::env;

use crate::utils::db_connect::PgPool;

#[derive(Debug, Clone, Default)]
pub struct PlatformFilterConfig {
    pub enabled: bool,
    pub allowed_platforms: Vec<String>,
}

impl PlatformFilterConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let enabled = env::var("DEDUP_PLATFORM_FILTER_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let allowed_platforms = if enabled {
            env::var("DEDUP_ALLOWED_PLATFORMS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            Vec::new()
        };

        debug!(
            "Platform filter config: enabled={}, platforms={:?}",
            enabled, allowed_platforms
        );

        Self {
            enabled,
            allowed_platforms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.allowed_platforms.is_empty()
    }

    /// Listings with no known platform are excluded while the filter is active.
    pub fn allows(&self, platform: Option<&str>) -> bool {
        if !self.is_active() {
            return true;
        }
        match platform {
            Some(p) => self
                .allowed_platforms
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(p)),
            None => false,
        }
    }

    pub fn log_config(&self) {
        if self.is_active() {
            info!("🔍 Platform filtering ENABLED");
            info!("   Allowed platforms: {:?}", self.allowed_platforms);
        } else {
            info!("🔍 Platform filtering DISABLED - deduplicating listings from all platforms");
        }
    }

    /// Logs how many listing sightings exist per configured platform.
    pub async fn validate_platforms(&self, pool: &PgPool) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let conn = pool.get().await.context("Failed to get DB connection")?;

        let query = "
            SELECT UPPER(platform) AS platform, COUNT(DISTINCT listing_id) AS count
            FROM public.listing_source
            WHERE UPPER(platform) = ANY($1)
            GROUP BY UPPER(platform)
            ORDER BY count DESC";

        let rows = conn
            .query(query, &[&self.allowed_platforms])
            .await
            .context("Failed to validate platform filter")?;

        if rows.is_empty() {
            warn!(
                "⚠️ No listings found for platforms: {:?}",
                self.allowed_platforms
            );
            return Ok(());
        }

        info!("✅ Platform validation results:");
        for row in rows {
            let platform: String = row.get("platform");
            let count: i64 = row.get("count");
            info!("   {}: {} listings", platform, count);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_filter_from_env() {
        env::set_var("DEDUP_PLATFORM_FILTER_ENABLED", "true");
        env::set_var("DEDUP_ALLOWED_PLATFORMS", "bizbuysell, loopnet,");

        let config = PlatformFilterConfig::from_env();
        assert!(config.is_active());
        assert_eq!(config.allowed_platforms, vec!["BIZBUYSELL", "LOOPNET"]);

        env::remove_var("DEDUP_PLATFORM_FILTER_ENABLED");
        env::remove_var("DEDUP_ALLOWED_PLATFORMS");
    }

    #[test]
    fn test_allows() {
        let config = PlatformFilterConfig {
            enabled: true,
            allowed_platforms: vec!["BIZBUYSELL".to_string()],
        };
        assert!(config.allows(Some("bizbuysell")));
        assert!(!config.allows(Some("LOOPNET")));
        assert!(!config.allows(None));

        let disabled = PlatformFilterConfig::default();
        assert!(disabled.allows(None));
        assert!(disabled.allows(Some("LOOPNET")));
    }
}
