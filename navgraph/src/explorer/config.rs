use crate::dedup::CacheConfig;
use crate::errors::ExplorerError;
use crate::fingerprint::FingerprintPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds and policies of one exploration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Maximum recursion depth below the start screen
    pub max_depth: usize,
    /// Stop after discovering this many screens
    pub max_screens: usize,
    /// How long to wait for the UI to react to an activation
    pub per_element_timeout_ms: u64,
    /// Quiet period after the last change event before the UI counts as settled
    pub settle_quiet_ms: u64,
    pub per_screen_timeout_ms: u64,
    pub session_timeout_ms: u64,
    /// Explored/discovered ratio required for a COMPLETED session
    pub completeness_threshold: f64,
    /// Minimum classifier confidence before a control is treated as expandable
    pub expansion_confidence_threshold: f32,
    /// Fixed delay after activating an expandable control
    pub expansion_settle_ms: u64,
    pub max_scrolls_per_screen: usize,
    /// Back presses tried before relaunching during recovery
    pub max_back_attempts: usize,
    pub fingerprint: FingerprintPolicy,
    pub cache: CacheConfig,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_screens: 200,
            per_element_timeout_ms: 2000,
            settle_quiet_ms: 150,
            per_screen_timeout_ms: 60_000,
            session_timeout_ms: 30 * 60 * 1000,
            completeness_threshold: 0.8,
            expansion_confidence_threshold: 0.7,
            expansion_settle_ms: 300,
            max_scrolls_per_screen: 5,
            max_back_attempts: 3,
            fingerprint: FingerprintPolicy::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ExplorationConfig {
    pub fn validate(&self) -> Result<(), ExplorerError> {
        let invalid = |msg: &str| Err(ExplorerError::InvalidConfig(msg.to_string()));

        if self.max_screens == 0 {
            return invalid("max_screens must be at least 1");
        }
        if self.per_element_timeout_ms == 0 {
            return invalid("per_element_timeout_ms must be positive");
        }
        if self.settle_quiet_ms > self.per_element_timeout_ms {
            return invalid("settle_quiet_ms cannot exceed per_element_timeout_ms");
        }
        if self.per_screen_timeout_ms == 0 || self.session_timeout_ms == 0 {
            return invalid("screen and session timeouts must be positive");
        }
        if !(0.0..=1.0).contains(&self.completeness_threshold) {
            return invalid("completeness_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.expansion_confidence_threshold) {
            return invalid("expansion_confidence_threshold must be within [0, 1]");
        }
        if self.cache.memory_capacity == 0 {
            return invalid("cache.memory_capacity must be at least 1");
        }
        if let FingerprintPolicy::AncestorContext { depth: 0 } = self.fingerprint {
            return invalid("ancestor_context depth must be at least 1");
        }
        Ok(())
    }

    pub fn per_element_timeout(&self) -> Duration {
        Duration::from_millis(self.per_element_timeout_ms)
    }

    pub fn settle_quiet(&self) -> Duration {
        Duration::from_millis(self.settle_quiet_ms)
    }

    pub fn per_screen_timeout(&self) -> Duration {
        Duration::from_millis(self.per_screen_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn expansion_settle(&self) -> Duration {
        Duration::from_millis(self.expansion_settle_ms)
    }
}
