//! Configuration for classifiers, safety validators and model loading

use binwise_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which classifier implementation to instantiate at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierVariant {
    /// Deterministic-distribution mock; no external resources
    #[default]
    Mock,
    /// CLIP zero-shot classification against text prompts
    ZeroShot,
    /// EfficientNet ImageNet backbone mapped onto waste categories
    Lightweight,
}

impl std::str::FromStr for ClassifierVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "mock" => Ok(Self::Mock),
            "zero_shot" | "clip" => Ok(Self::ZeroShot),
            "lightweight" | "efficientnet" => Ok(Self::Lightweight),
            other => Err(format!("unknown classifier variant '{}'", other)),
        }
    }
}

/// Which safety validator implementation to instantiate at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyVariant {
    #[default]
    Mock,
    /// Pixel-statistics quality gate
    Quality,
}

impl std::str::FromStr for SafetyVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "quality" => Ok(Self::Quality),
            other => Err(format!("unknown safety variant '{}'", other)),
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub variant: ClassifierVariant,

    /// Device to run candle models on
    #[serde(default)]
    pub device: DeviceSpec,

    /// Model download cache directory
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub mock: MockConfig,

    #[serde(default)]
    pub zero_shot: ZeroShotConfig,

    #[serde(default)]
    pub lightweight: LightweightConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            variant: ClassifierVariant::default(),
            device: DeviceSpec::default(),
            cache_dir: default_cache_dir(),
            mock: MockConfig::default(),
            zero_shot: ZeroShotConfig::default(),
            lightweight: LightweightConfig::default(),
        }
    }
}

impl ClassifierConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Check numeric invariants of the variant-specific sections
    pub fn validate(&self) -> Result<()> {
        if !(self.zero_shot.temperature.is_finite() && self.zero_shot.temperature > 0.0) {
            return Err(Error::config(format!(
                "zero-shot temperature must be positive, got {}",
                self.zero_shot.temperature
            )));
        }
        if self.lightweight.top_k == 0 {
            return Err(Error::config("lightweight top_k must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.lightweight.min_confidence) {
            return Err(Error::config(format!(
                "lightweight min_confidence {} is outside [0, 1)",
                self.lightweight.min_confidence
            )));
        }
        Ok(())
    }
}

/// Mock classifier settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Fixed seed for reproducible predictions
    pub seed: Option<u64>,
}

/// Zero-shot (CLIP) classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroShotConfig {
    #[serde(default = "default_clip_source")]
    pub source: ModelSourceSpec,

    #[serde(default = "default_clip_weights")]
    pub weights_file: String,

    #[serde(default = "default_tokenizer_file")]
    pub tokenizer_file: String,

    /// Softmax temperature applied to cosine similarities
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ZeroShotConfig {
    fn default() -> Self {
        Self {
            source: default_clip_source(),
            weights_file: default_clip_weights(),
            tokenizer_file: default_tokenizer_file(),
            temperature: default_temperature(),
        }
    }
}

/// Lightweight (EfficientNet) classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightweightConfig {
    #[serde(default = "default_efficientnet_source")]
    pub source: ModelSourceSpec,

    #[serde(default = "default_efficientnet_weights")]
    pub weights_file: String,

    /// Number of backbone classes considered per image
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// A mapped class must reach this probability to count
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for LightweightConfig {
    fn default() -> Self {
        Self {
            source: default_efficientnet_source(),
            weights_file: default_efficientnet_weights(),
            top_k: default_top_k(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Safety validator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub variant: SafetyVariant,

    #[serde(default)]
    pub mock: MockSafetyConfig,

    #[serde(default)]
    pub quality: QualityConfig,
}

/// Mock safety validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockSafetyConfig {
    #[serde(default = "default_pass_rate")]
    pub pass_rate: f64,

    pub seed: Option<u64>,
}

impl Default for MockSafetyConfig {
    fn default() -> Self {
        Self {
            pass_rate: default_pass_rate(),
            seed: None,
        }
    }
}

/// Thresholds for the pixel-statistics quality gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Laplacian variance below this is blurry
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f32,

    /// Mean luma below this is too dark
    #[serde(default = "default_dark_threshold")]
    pub dark_threshold: f32,

    /// Mean luma above this is overexposed
    #[serde(default = "default_bright_threshold")]
    pub bright_threshold: f32,

    /// Luma standard deviation below this is blank
    #[serde(default = "default_blank_stddev")]
    pub blank_stddev: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            blur_threshold: default_blur_threshold(),
            dark_threshold: default_dark_threshold(),
            bright_threshold: default_bright_threshold(),
            blank_stddev: default_blank_stddev(),
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.blur_threshold <= 0.0 {
            return Err(Error::config("blur_threshold must be positive"));
        }
        if self.dark_threshold >= self.bright_threshold {
            return Err(Error::config(format!(
                "dark_threshold ({}) must be below bright_threshold ({})",
                self.dark_threshold, self.bright_threshold
            )));
        }
        if self.blank_stddev < 0.0 {
            return Err(Error::config("blank_stddev must not be negative"));
        }
        Ok(())
    }
}

/// Where model files come from, as written in config files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSourceSpec {
    /// Local directory holding the model files
    Local { path: PathBuf },

    /// Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
    },
}

/// Inference device, as written in config files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda { index: Option<usize> },
    Metal { index: Option<usize> },
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("binwise/models")
}

fn default_clip_source() -> ModelSourceSpec {
    ModelSourceSpec::HuggingFace {
        repo_id: "openai/clip-vit-base-patch32".to_string(),
        revision: Some("refs/pr/15".to_string()),
    }
}

fn default_clip_weights() -> String {
    "model.safetensors".to_string()
}

fn default_tokenizer_file() -> String {
    "tokenizer.json".to_string()
}

fn default_temperature() -> f32 {
    0.01
}

fn default_efficientnet_source() -> ModelSourceSpec {
    ModelSourceSpec::HuggingFace {
        repo_id: "lmz/candle-efficientnet".to_string(),
        revision: None,
    }
}

fn default_efficientnet_weights() -> String {
    "efficientnet-b0.safetensors".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_min_confidence() -> f32 {
    0.15
}

fn default_pass_rate() -> f64 {
    0.92
}

fn default_blur_threshold() -> f32 {
    100.0
}

fn default_dark_threshold() -> f32 {
    40.0
}

fn default_bright_threshold() -> f32 {
    225.0
}

fn default_blank_stddev() -> f32 {
    4.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_config_yaml() {
        let yaml = r#"
variant: zero_shot
device: cpu
cache_dir: ./my-models
zero_shot:
  source:
    path: ./models/clip
  temperature: 0.05
lightweight:
  top_k: 10
"#;

        let config = ClassifierConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.variant, ClassifierVariant::ZeroShot);
        assert_eq!(config.cache_dir, PathBuf::from("./my-models"));
        assert_eq!(
            config.zero_shot.source,
            ModelSourceSpec::Local {
                path: PathBuf::from("./models/clip")
            }
        );
        assert_eq!(config.zero_shot.temperature, 0.05);
        assert_eq!(config.zero_shot.weights_file, "model.safetensors");
        assert_eq!(config.lightweight.top_k, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = ClassifierConfig::from_yaml("{}").unwrap();
        assert_eq!(config.variant, ClassifierVariant::Mock);
        assert!(matches!(config.device, DeviceSpec::Cpu));
        assert!(matches!(
            config.lightweight.source,
            ModelSourceSpec::HuggingFace { .. }
        ));
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("zero-shot".parse::<ClassifierVariant>(), Ok(ClassifierVariant::ZeroShot));
        assert_eq!("CLIP".parse::<ClassifierVariant>(), Ok(ClassifierVariant::ZeroShot));
        assert_eq!("lightweight".parse::<ClassifierVariant>(), Ok(ClassifierVariant::Lightweight));
        assert!("resnet".parse::<ClassifierVariant>().is_err());
        assert_eq!("quality".parse::<SafetyVariant>(), Ok(SafetyVariant::Quality));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let mut config = ClassifierConfig::default();
        config.zero_shot.temperature = 0.0;
        assert!(config.validate().is_err());

        let mut config = ClassifierConfig::default();
        config.lightweight.top_k = 0;
        assert!(config.validate().is_err());

        let quality = QualityConfig {
            dark_threshold: 200.0,
            bright_threshold: 100.0,
            ..Default::default()
        };
        assert!(quality.validate().is_err());
    }

    #[test]
    fn test_device_spec() {
        let spec: DeviceSpec = serde_yaml::from_str("cpu").unwrap();
        assert!(matches!(spec, DeviceSpec::Cpu));
    }
}
