//! Pipeline configuration

use crate::circuit_breaker::{CircuitBreakerConfig, DEFAULT_CALL_TIMEOUT};
use crate::confidence::{ConfidenceEngine, DEFAULT_HIGH_THRESHOLD, DEFAULT_MEDIUM_THRESHOLD};
use binwise_classifiers::{ClassifierConfig, SafetyConfig};
use binwise_core::{Error, Result, DEFAULT_TARGET_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a [`ClassificationPipeline`](crate::ClassificationPipeline)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub confidence: ConfidenceConfig,

    #[serde(default)]
    pub breakers: BreakersConfig,

    /// Upper bound on inferences running at once
    #[serde(default = "default_max_concurrent_inferences")]
    pub max_concurrent_inferences: usize,

    /// Square edge length images are resized to
    #[serde(default = "default_target_size")]
    pub target_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            safety: SafetyConfig::default(),
            confidence: ConfidenceConfig::default(),
            breakers: BreakersConfig::default(),
            max_concurrent_inferences: default_max_concurrent_inferences(),
            target_size: default_target_size(),
        }
    }
}

impl PipelineConfig {
    /// Parse from a YAML string and validate
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse pipeline config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file; a missing file yields the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Check every section; called again at pipeline construction
    pub fn validate(&self) -> Result<()> {
        self.classifier.validate()?;
        self.safety.quality.validate()?;
        if !(0.0..=1.0).contains(&self.safety.mock.pass_rate) {
            return Err(Error::config(format!(
                "safety pass_rate {} is outside [0, 1]",
                self.safety.mock.pass_rate
            )));
        }
        self.confidence.engine()?;
        self.breakers.classifier.to_breaker_config()?;
        self.breakers.safety.to_breaker_config()?;
        if self.max_concurrent_inferences == 0 {
            return Err(Error::config("max_concurrent_inferences must be at least 1"));
        }
        if self.target_size == 0 {
            return Err(Error::config("target_size must be positive"));
        }
        Ok(())
    }
}

/// Confidence tier thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    #[serde(default = "default_high")]
    pub high: f32,

    #[serde(default = "default_medium")]
    pub medium: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            high: default_high(),
            medium: default_medium(),
        }
    }
}

impl ConfidenceConfig {
    pub fn engine(&self) -> Result<ConfidenceEngine> {
        ConfidenceEngine::new(self.high, self.medium)
    }
}

/// One breaker per protected dependency
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakersConfig {
    #[serde(default)]
    pub classifier: BreakerSettings,

    #[serde(default)]
    pub safety: BreakerSettings,
}

/// Breaker settings in config-file units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: f64,

    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Per-call budget; an explicit `null` disables it
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: Option<f64>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> Result<CircuitBreakerConfig> {
        let seconds = |value: f64, what: &str| {
            Duration::try_from_secs_f64(value)
                .map_err(|e| Error::config(format!("invalid {} {}: {}", what, value, e)))
        };

        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: seconds(self.reset_timeout_secs, "reset_timeout_secs")?,
            half_open_max_calls: self.half_open_max_calls,
            call_timeout: self
                .call_timeout_secs
                .map(|s| seconds(s, "call_timeout_secs"))
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn default_max_concurrent_inferences() -> usize {
    num_cpus::get()
}

fn default_target_size() -> u32 {
    DEFAULT_TARGET_SIZE
}

fn default_high() -> f32 {
    DEFAULT_HIGH_THRESHOLD
}

fn default_medium() -> f32 {
    DEFAULT_MEDIUM_THRESHOLD
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> f64 {
    30.0
}

fn default_half_open_max_calls() -> u32 {
    1
}

fn default_call_timeout_secs() -> Option<f64> {
    Some(DEFAULT_CALL_TIMEOUT.as_secs_f64())
}
