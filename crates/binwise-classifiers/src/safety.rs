//! Safety validators
//!
//! Two implementations ship with binwise:
//! - [`MockSafetyValidator`]: mostly passes, occasionally raises one flag from
//!   a fixed vocabulary. Keeps the pipeline testable without network access.
//! - [`ImageQualityValidator`]: deterministic pixel statistics that catch
//!   blurry, dark, overexposed and blank photos before they reach a human.

use crate::classifier::SafetyValidator;
use crate::config::QualityConfig;
use async_trait::async_trait;
use binwise_core::{Error, PreparedImage, Result, SafetyCheckResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};

/// Flag: the photo is too blurry to classify
pub const FLAG_BLURRY: &str = "blurry_image";
/// Flag: the subject does not look like waste
pub const FLAG_NOT_WASTE: &str = "not_waste";
/// Flag: the photo contains inappropriate content
pub const FLAG_INAPPROPRIATE: &str = "inappropriate_content";
/// Flag: the photo is underexposed
pub const FLAG_TOO_DARK: &str = "too_dark";
/// Flag: the photo is overexposed
pub const FLAG_OVEREXPOSED: &str = "overexposed";
/// Flag: the photo has almost no visual content
pub const FLAG_BLANK: &str = "blank_image";

const MOCK_FLAGS: [&str; 3] = [FLAG_BLURRY, FLAG_NOT_WASTE, FLAG_INAPPROPRIATE];

/// Mock safety validator with a configurable pass rate
pub struct MockSafetyValidator {
    rng: Mutex<StdRng>,
    pass_rate: f64,
    loaded: AtomicBool,
}

impl MockSafetyValidator {
    pub const MODEL_NAME: &'static str = "mock-safety-validator";
    pub const MODEL_VERSION: &'static str = "1.0.0";

    /// Create a validator that passes `pass_rate` of images
    pub fn new(pass_rate: f64) -> Result<Self> {
        Self::build(pass_rate, StdRng::from_entropy())
    }

    /// Reproducible variant for tests
    pub fn with_seed(pass_rate: f64, seed: u64) -> Result<Self> {
        Self::build(pass_rate, StdRng::seed_from_u64(seed))
    }

    fn build(pass_rate: f64, rng: StdRng) -> Result<Self> {
        if !(0.0..=1.0).contains(&pass_rate) {
            return Err(Error::config(format!(
                "mock safety pass rate {} is outside [0, 1]",
                pass_rate
            )));
        }
        Ok(Self {
            rng: Mutex::new(rng),
            pass_rate,
            loaded: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SafetyValidator for MockSafetyValidator {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn model_version(&self) -> &str {
        Self::MODEL_VERSION
    }

    async fn load(&self) -> Result<()> {
        if !self.loaded.swap(true, Ordering::AcqRel) {
            tracing::info!("Loaded {} v{}", Self::MODEL_NAME, Self::MODEL_VERSION);
        }
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    async fn validate(&self, _image: &PreparedImage) -> Result<SafetyCheckResult> {
        if !self.is_loaded() {
            return Err(Error::not_loaded(Self::MODEL_NAME));
        }

        let mut rng = self.rng.lock();
        if rng.gen_bool(self.pass_rate) {
            SafetyCheckResult::pass(rng.gen_range(0.85..0.99))
        } else {
            let flag = MOCK_FLAGS.choose(&mut *rng).copied().unwrap_or(FLAG_NOT_WASTE);
            SafetyCheckResult::fail([flag], rng.gen_range(0.60..0.95))
        }
    }
}

/// Pixel statistics gathered by [`ImageQualityValidator`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityStats {
    /// Mean luma, 0-255
    pub mean_luma: f32,
    /// Standard deviation of luma
    pub luma_stddev: f32,
    /// Variance of the 4-neighbour Laplacian; low values mean blur
    pub laplacian_variance: f32,
}

impl QualityStats {
    /// Compute statistics over a normalized image
    pub fn measure(image: &PreparedImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let luma = image.luma();
        let n = luma.len().max(1) as f32;

        let mean_luma = luma.iter().sum::<f32>() / n;
        let luma_stddev = (luma.iter().map(|v| (v - mean_luma).powi(2)).sum::<f32>() / n).sqrt();

        let mut responses = Vec::with_capacity(w.saturating_sub(2) * h.saturating_sub(2));
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let at = |xx: usize, yy: usize| luma[yy * w + xx];
                responses.push(
                    4.0 * at(x, y) - at(x - 1, y) - at(x + 1, y) - at(x, y - 1) - at(x, y + 1),
                );
            }
        }
        let laplacian_variance = if responses.is_empty() {
            0.0
        } else {
            let m = responses.len() as f32;
            let mean = responses.iter().sum::<f32>() / m;
            responses.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / m
        };

        Self {
            mean_luma,
            luma_stddev,
            laplacian_variance,
        }
    }
}

/// Deterministic quality gate based on exposure, contrast and sharpness
pub struct ImageQualityValidator {
    config: QualityConfig,
    loaded: AtomicBool,
}

impl ImageQualityValidator {
    pub const MODEL_NAME: &'static str = "image-quality-heuristics";
    pub const MODEL_VERSION: &'static str = "1.0.0";

    pub fn new(config: QualityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loaded: AtomicBool::new(false),
        })
    }

    /// Flags raised by the given statistics, in a stable order
    pub fn evaluate(&self, stats: &QualityStats) -> Vec<&'static str> {
        let mut flags = Vec::new();

        if stats.luma_stddev < self.config.blank_stddev {
            flags.push(FLAG_BLANK);
        }
        if stats.mean_luma < self.config.dark_threshold {
            flags.push(FLAG_TOO_DARK);
        } else if stats.mean_luma > self.config.bright_threshold {
            flags.push(FLAG_OVEREXPOSED);
        }
        if stats.laplacian_variance < self.config.blur_threshold {
            flags.push(FLAG_BLURRY);
        }

        flags
    }
}

#[async_trait]
impl SafetyValidator for ImageQualityValidator {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn model_version(&self) -> &str {
        Self::MODEL_VERSION
    }

    async fn load(&self) -> Result<()> {
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    async fn validate(&self, image: &PreparedImage) -> Result<SafetyCheckResult> {
        if !self.is_loaded() {
            return Err(Error::not_loaded(Self::MODEL_NAME));
        }

        let stats = QualityStats::measure(image);
        let flags = self.evaluate(&stats);
        tracing::debug!(?stats, ?flags, "Image quality measured");

        // Confidence grows with distance from the blur threshold.
        let sharpness = stats.laplacian_variance / (stats.laplacian_variance + self.config.blur_threshold);
        if flags.is_empty() {
            SafetyCheckResult::pass(sharpness.clamp(0.5, 1.0))
        } else {
            SafetyCheckResult::fail(flags, (1.0 - sharpness).clamp(0.5, 1.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn checkerboard(size: u32) -> PreparedImage {
        PreparedImage::from_rgb(RgbImage::from_fn(size, size, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                Rgb([30, 30, 30])
            } else {
                Rgb([220, 220, 220])
            }
        }))
    }

    #[tokio::test]
    async fn test_mock_flags_are_exclusive_with_pass() {
        let validator = MockSafetyValidator::with_seed(0.5, 11).unwrap();
        validator.load().await.unwrap();
        let image = PreparedImage::placeholder(8);

        let mut failures = 0;
        for _ in 0..200 {
            let result = validator.validate(&image).await.unwrap();
            assert_eq!(result.passed(), result.flags().is_empty());
            if !result.passed() {
                failures += 1;
                assert_eq!(result.flags().len(), 1);
                assert!(MOCK_FLAGS.contains(&result.flags()[0].as_str()));
            }
        }
        assert!(failures > 0 && failures < 200);
    }

    #[tokio::test]
    async fn test_mock_always_passes_at_full_rate() {
        let validator = MockSafetyValidator::with_seed(1.0, 5).unwrap();
        validator.load().await.unwrap();
        for _ in 0..50 {
            assert!(validator.validate(&PreparedImage::placeholder(8)).await.unwrap().passed());
        }
    }

    #[test]
    fn test_mock_rejects_bad_pass_rate() {
        assert!(MockSafetyValidator::new(1.5).is_err());
        assert!(MockSafetyValidator::new(-0.1).is_err());
    }

    #[tokio::test]
    async fn test_quality_validator_requires_load() {
        let validator = ImageQualityValidator::new(QualityConfig::default()).unwrap();
        let err = validator.validate(&checkerboard(16)).await.unwrap_err();
        assert!(matches!(err, Error::ModelNotLoaded(_)));
    }

    #[tokio::test]
    async fn test_placeholder_is_blank_and_blurry() {
        let validator = ImageQualityValidator::new(QualityConfig::default()).unwrap();
        validator.load().await.unwrap();

        let result = validator.validate(&PreparedImage::placeholder(32)).await.unwrap();
        assert!(!result.passed());
        assert!(result.flags().contains(&FLAG_BLANK.to_string()));
        assert!(result.flags().contains(&FLAG_BLURRY.to_string()));
    }

    #[tokio::test]
    async fn test_sharp_image_passes() {
        let validator = ImageQualityValidator::new(QualityConfig::default()).unwrap();
        validator.load().await.unwrap();

        let result = validator.validate(&checkerboard(32)).await.unwrap();
        assert!(result.passed(), "flags: {:?}", result.flags());
        assert!(result.confidence() >= 0.5);
    }

    #[test]
    fn test_dark_image_flagged() {
        let validator = ImageQualityValidator::new(QualityConfig::default()).unwrap();
        let dark = PreparedImage::from_rgb(RgbImage::from_fn(16, 16, |x, _| {
            Rgb([(x % 2 * 20) as u8, 5, 5])
        }));

        let flags = validator.evaluate(&QualityStats::measure(&dark));
        assert!(flags.contains(&FLAG_TOO_DARK));
        assert!(!flags.contains(&FLAG_OVEREXPOSED));
    }
}
