// src/utils/progress_config.rs

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::env;

/// Configuration for progress tracking throughout a run
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Whether to show progress bars at all
    pub enabled: bool,
    /// Whether to show per-phase sub-progress bars
    pub detailed: bool,
    /// Whether to report memory usage in the run summary
    pub show_memory: bool,
    /// Whether to report database pool statistics in the run summary
    pub show_db_connection_stats: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: true,
            show_memory: true,
            show_db_connection_stats: true,
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ProgressConfig {
    /// Create progress configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("PROGRESS_ENABLED", true),
            detailed: env_flag("PROGRESS_DETAILED", true),
            show_memory: env_flag("PROGRESS_SHOW_MEMORY", true),
            show_db_connection_stats: env_flag("PROGRESS_SHOW_DB_CONNECTIONS", true),
        }
    }

    /// Create a MultiProgress instance if progress is enabled, None otherwise
    pub fn create_multi_progress(&self) -> Option<MultiProgress> {
        if self.enabled {
            Some(MultiProgress::new())
        } else {
            None
        }
    }

    pub fn should_show_detailed(&self) -> bool {
        self.enabled && self.detailed
    }

    pub fn should_show_memory(&self) -> bool {
        self.enabled && self.show_memory
    }

    pub fn should_show_db_connection_stats(&self) -> bool {
        self.enabled && self.show_db_connection_stats
    }
}

/// Adds a styled bar to `multi_progress` when progress output is enabled.
pub fn phase_bar(multi_progress: &Option<MultiProgress>, len: u64, message: &str) -> Option<ProgressBar> {
    multi_progress.as_ref().map(|mp| {
        let pb = mp.add(ProgressBar::new(len));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.cyan} [{elapsed_precise}] {bar:30.green/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        pb.set_message(message.to_string());
        pb
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_config_hides_everything() {
        let config = ProgressConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(config.create_multi_progress().is_none());
        assert!(!config.should_show_detailed());
        assert!(!config.should_show_memory());
        assert!(!config.should_show_db_connection_stats());
    }

    #[test]
    fn test_phase_bar_absent_without_multi_progress() {
        assert!(phase_bar(&None, 10, "Scoring").is_none());
        let mp = Some(MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()));
        let pb = phase_bar(&mp, 10, "Scoring").unwrap();
        assert_eq!(pb.length(), Some(10));
    }
}
