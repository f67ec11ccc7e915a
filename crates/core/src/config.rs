use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ErrorCategory, VitalsError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    #[serde(with = "crate::duration_ms")]
    pub debounce: Duration,
    #[serde(with = "crate::duration_ms")]
    pub min_interval: Duration,
    #[serde(with = "crate::duration_ms")]
    pub poll_interval: Duration,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            min_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    #[serde(with = "crate::duration_ms")]
    pub timing_retry_interval: Duration,
    pub timing_max_retries: u32,
    #[serde(with = "crate::duration_ms")]
    pub transition_poll_interval: Duration,
    /// Absolute cap on how long a transition waits for visual completion.
    #[serde(with = "crate::duration_ms")]
    pub transition_max_wait: Duration,
    #[serde(with = "crate::duration_ms")]
    pub base_wait: Duration,
    #[serde(with = "crate::duration_ms")]
    pub min_wait: Duration,
    #[serde(with = "crate::duration_ms")]
    pub max_wait: Duration,
    pub complex_page_elements: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            timing_retry_interval: Duration::from_millis(500),
            timing_max_retries: 3,
            transition_poll_interval: Duration::from_millis(300),
            transition_max_wait: Duration::from_millis(8000),
            base_wait: Duration::from_millis(3000),
            min_wait: Duration::from_millis(1500),
            max_wait: Duration::from_millis(5000),
            complex_page_elements: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub window_size: usize,
    pub min_samples: usize,
    pub content_delta: u64,
    pub layout_delta: f64,
    pub resource_delta: u32,
    pub stable_ratio: f64,
    pub overall_ratio: f64,
    #[serde(with = "crate::duration_ms")]
    pub content_layout_min_elapsed: Duration,
    #[serde(with = "crate::duration_ms")]
    pub resource_min_elapsed: Duration,
    #[serde(with = "crate::duration_ms")]
    pub mutation_quiet: Duration,
    #[serde(with = "crate::duration_ms")]
    pub overall_min_elapsed: Duration,
    #[serde(with = "crate::duration_ms")]
    pub hard_ceiling: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_samples: 8,
            content_delta: 50,
            layout_delta: 50.0,
            resource_delta: 2,
            stable_ratio: 0.75,
            overall_ratio: 0.8,
            content_layout_min_elapsed: Duration::from_millis(500),
            resource_min_elapsed: Duration::from_millis(1000),
            mutation_quiet: Duration::from_millis(800),
            overall_min_elapsed: Duration::from_millis(300),
            hard_ceiling: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub significance_threshold: u32,
    /// Opened by the first burst and closed on schedule; later bursts add to
    /// it without extending it.
    #[serde(with = "crate::duration_ms", alias = "window")]
    pub scoring_window: Duration,
    pub large_block_text: u32,
    pub large_block_area: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            significance_threshold: 50,
            scoring_window: Duration::from_millis(300),
            large_block_text: 500,
            large_block_area: 40_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricThresholds {
    pub ttfb: f64,
    pub fcp: f64,
    pub lcp: f64,
    pub cls: f64,
    pub other: f64,
    pub relative: f64,
}

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            ttfb: 50.0,
            fcp: 100.0,
            lcp: 200.0,
            cls: 0.01,
            other: 100.0,
            relative: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    #[serde(with = "crate::duration_ms")]
    pub base_interval: Duration,
    #[serde(with = "crate::duration_ms")]
    pub min_interval: Duration,
    #[serde(with = "crate::duration_ms")]
    pub max_interval: Duration,
    pub stable_factor: f64,
    pub unstable_factor: f64,
    pub quiet_streak: usize,
    pub history_len: usize,
    pub thresholds: MetricThresholds,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(1000),
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_millis(5000),
            stable_factor: 1.5,
            unstable_factor: 0.7,
            quiet_streak: 3,
            history_len: 10,
            thresholds: MetricThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    #[serde(with = "crate::duration_ms")]
    pub reconnect_delay: Duration,
    pub max_failures_per_epoch: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(2000),
            max_failures_per_epoch: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "crate::duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "crate::duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub navigation: NavigationConfig,
    pub collection: CollectionConfig,
    pub stability: StabilityConfig,
    pub mutation: MutationConfig,
    pub update: UpdateConfig,
    pub observer: ObserverConfig,
    pub retry: RetryConfig,
}

impl EngineConfig {
    pub fn with_hard_ceiling(mut self, ms: u64) -> Self {
        self.stability.hard_ceiling = Duration::from_millis(ms);
        self
    }

    pub fn with_window_size(mut self, samples: usize) -> Self {
        self.stability.window_size = samples.clamp(8, 15);
        self.stability.min_samples = self.stability.min_samples.min(self.stability.window_size);
        self
    }

    pub fn with_base_interval(mut self, ms: u64) -> Self {
        self.update.base_interval = Duration::from_millis(ms);
        self
    }

    /// Tighter budgets for short-lived, synthetic pages.
    pub fn fast() -> Self {
        let mut config = Self::default();
        config.collection.transition_max_wait = Duration::from_millis(5000);
        config.stability.hard_ceiling = Duration::from_millis(8000);
        config.update.max_interval = Duration::from_millis(3000);
        config
    }

    /// Longer budgets for heavy pages on slow devices.
    pub fn patient() -> Self {
        let mut config = Self::default();
        config.collection.timing_retry_interval = Duration::from_millis(1000);
        config.stability.hard_ceiling = Duration::from_millis(12_000);
        config.observer.reconnect_delay = Duration::from_millis(3000);
        config
    }

    pub fn from_json_str(raw: &str) -> Result<Self, VitalsError> {
        serde_json::from_str(raw).map_err(|e| {
            VitalsError::new(ErrorCategory::ValidationFailure, format!("Invalid engine config: {}", e))
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, VitalsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VitalsError::new(
                ErrorCategory::ValidationFailure,
                format!("Failed to read config {}: {}", path.display(), e),
            )
        })?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "stability": { "hard_ceiling": 9000 }, "update": { "base_interval": 800 } }"#,
        )
        .unwrap();
        assert_eq!(config.stability.hard_ceiling, Duration::from_millis(9000));
        assert_eq!(config.stability.window_size, 10);
        assert_eq!(config.update.base_interval, Duration::from_millis(800));
        assert_eq!(config.navigation.debounce, Duration::from_millis(100));
    }

    #[test]
    fn window_size_is_clamped() {
        assert_eq!(EngineConfig::default().with_window_size(40).stability.window_size, 15);
        let small = EngineConfig::default().with_window_size(2);
        assert_eq!(small.stability.window_size, 8);
        assert!(small.stability.min_samples <= 8);
    }

    #[test]
    fn presets_stay_under_the_twelve_second_ceiling() {
        for config in [EngineConfig::default(), EngineConfig::fast(), EngineConfig::patient()] {
            assert!(config.stability.hard_ceiling <= Duration::from_secs(12));
        }
    }

    #[test]
    fn bad_json_is_a_validation_failure() {
        let err = EngineConfig::from_json_str("{ nope").unwrap_err();
        assert_eq!(err.category, ErrorCategory::ValidationFailure);
    }
}
