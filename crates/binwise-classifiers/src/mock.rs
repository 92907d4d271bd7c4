//! Mock classifier
//!
//! Loads instantly and needs no external resources. Predictions are drawn
//! from fixed distributions weighted to resemble real household waste, so
//! downstream tiering and bin assignment see realistic inputs. Used for local
//! development, tests, and as the automatic fallback when a real model fails
//! to load.

use crate::classifier::Classifier;
use async_trait::async_trait;
use binwise_core::{ClassificationPrediction, Error, PreparedImage, Result, WasteCategory};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const MODEL_NAME: &str = "mock-waste-classifier";
const MODEL_VERSION: &str = "1.0.0";

/// Relative frequency of each category, in `WasteCategory::ALL` order
const CATEGORY_WEIGHTS: [f32; 6] = [0.25, 0.35, 0.07, 0.08, 0.20, 0.05];

/// Probability that a prediction carries a subcategory
const SUBCATEGORY_RATE: f64 = 0.8;

/// Mock image classifier with realistic output distributions
pub struct MockClassifier {
    rng: Mutex<StdRng>,
    loaded: AtomicBool,
    simulated_latency: Option<Duration>,
    call_count: AtomicU64,
}

impl MockClassifier {
    /// Create a mock seeded from system entropy
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a mock with a reproducible sequence of predictions
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            loaded: AtomicBool::new(false),
            simulated_latency: None,
            call_count: AtomicU64::new(0),
        }
    }

    /// Sleep for `latency` on every prediction
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = Some(latency);
        self
    }

    /// Number of predictions served
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    fn sample(&self) -> Result<ClassificationPrediction> {
        let mut rng = self.rng.lock();

        let category = weighted_category(rng.gen());

        // Mostly confident, sometimes borderline, occasionally poor.
        let roll: f32 = rng.gen();
        let confidence: f32 = if roll < 0.65 {
            rng.gen_range(0.85..0.99)
        } else if roll < 0.90 {
            rng.gen_range(0.60..0.85)
        } else {
            rng.gen_range(0.30..0.60)
        };

        let subcategory = if rng.gen_bool(SUBCATEGORY_RATE) {
            category.subcategories().choose(&mut *rng).copied()
        } else {
            None
        };

        // Spread the remaining mass over the other categories. Weights in
        // [0.5, 1) keep every runner-up below the winner.
        let others: Vec<(WasteCategory, f32)> = WasteCategory::ALL
            .into_iter()
            .filter(|c| *c != category)
            .map(|c| (c, rng.gen_range(0.5..1.0)))
            .collect();
        let weight_total: f32 = others.iter().map(|(_, w)| w).sum();
        let remainder = 1.0 - confidence;

        let mut raw_scores = BTreeMap::new();
        raw_scores.insert(category, confidence);
        for (other, weight) in others {
            raw_scores.insert(other, remainder * weight / weight_total);
        }

        ClassificationPrediction::new(category, confidence)?
            .with_subcategory(subcategory)?
            .with_raw_scores(raw_scores)
    }
}

/// Map a uniform draw in [0, 1) onto a category by [`CATEGORY_WEIGHTS`]
fn weighted_category(draw: f32) -> WasteCategory {
    let total: f32 = CATEGORY_WEIGHTS.iter().sum();
    let mut target = draw * total;
    for (category, weight) in WasteCategory::ALL.into_iter().zip(CATEGORY_WEIGHTS) {
        if target < weight {
            return category;
        }
        target -= weight;
    }
    WasteCategory::General
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn model_version(&self) -> &str {
        MODEL_VERSION
    }

    async fn load(&self) -> Result<()> {
        if !self.loaded.swap(true, Ordering::AcqRel) {
            tracing::info!("Loaded {} v{}", MODEL_NAME, MODEL_VERSION);
        }
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    async fn predict(&self, _image: &PreparedImage) -> Result<ClassificationPrediction> {
        if !self.is_loaded() {
            return Err(Error::not_loaded(MODEL_NAME));
        }
        self.call_count.fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = self.simulated_latency {
            tokio::time::sleep(latency).await;
        }

        self.sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_predict_before_load_fails() {
        let classifier = MockClassifier::with_seed(7);
        let err = classifier
            .predict(&PreparedImage::placeholder(8))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotLoaded(_)));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let classifier = MockClassifier::with_seed(7);
        classifier.load().await.unwrap();
        classifier.load().await.unwrap();
        assert!(classifier.is_loaded());
    }

    #[tokio::test]
    async fn test_predictions_are_structurally_valid() {
        let classifier = MockClassifier::with_seed(42);
        classifier.load().await.unwrap();
        let image = PreparedImage::placeholder(8);

        for _ in 0..500 {
            let prediction = classifier.predict(&image).await.unwrap();
            assert!((0.0..=1.0).contains(&prediction.confidence()));
            if let Some(sub) = prediction.subcategory() {
                assert_eq!(sub.category(), prediction.category());
            }

            let scores = prediction.raw_scores().unwrap();
            assert_eq!(scores.len(), WasteCategory::ALL.len());
            let total: f32 = scores.values().sum();
            assert!((total - 1.0).abs() < 1e-3);

            let best = scores
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(c, _)| *c)
                .unwrap();
            assert_eq!(best, prediction.category());
        }
        assert_eq!(classifier.call_count(), 500);
    }

    #[tokio::test]
    async fn test_seeded_mocks_agree() {
        let a = MockClassifier::with_seed(99);
        let b = MockClassifier::with_seed(99);
        a.load().await.unwrap();
        b.load().await.unwrap();
        let image = PreparedImage::placeholder(8);

        for _ in 0..20 {
            assert_eq!(a.predict(&image).await.unwrap(), b.predict(&image).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_distribution_favours_recyclables() {
        let classifier = MockClassifier::with_seed(1234);
        classifier.load().await.unwrap();
        let image = PreparedImage::placeholder(8);

        let mut recyclable = 0;
        let mut medical = 0;
        for _ in 0..2000 {
            match classifier.predict(&image).await.unwrap().category() {
                WasteCategory::Recyclable => recyclable += 1,
                WasteCategory::Medical => medical += 1,
                _ => {}
            }
        }
        assert!(recyclable > medical * 3, "recyclable={} medical={}", recyclable, medical);
    }

    #[test]
    fn test_weighted_category_bounds() {
        assert_eq!(weighted_category(0.0), WasteCategory::Organic);
        assert_eq!(weighted_category(0.30), WasteCategory::Recyclable);
        assert_eq!(weighted_category(0.9999), WasteCategory::Medical);
    }

    #[tokio::test]
    async fn test_batch_preserves_length() {
        let classifier = MockClassifier::with_seed(3);
        classifier.load().await.unwrap();
        let images = vec![PreparedImage::placeholder(8); 4];

        let predictions = classifier.predict_batch(&images).await.unwrap();
        assert_eq!(predictions.len(), 4);
    }
}
