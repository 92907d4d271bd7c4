//! End-to-end pipeline tests with scripted classifiers and validators

use async_trait::async_trait;
use binwise_classifiers::{
    Classifier, MockClassifier, MockSafetyValidator, SafetyValidator,
};
use binwise_core::{
    BinType, ClassificationPrediction, ConfidenceTier, Error, ImageInput, PreparedImage, Result,
    SafetyCheckResult, WasteCategory, WasteSubCategory,
};
use binwise_pipeline::{
    CircuitBreakerConfig, CircuitState, ClassificationPipeline, ConfidenceEngine, PipelineConfig,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn prediction(
    category: WasteCategory,
    confidence: f32,
    subcategory: Option<WasteSubCategory>,
) -> Result<ClassificationPrediction> {
    let rest = (1.0 - confidence) / (WasteCategory::ALL.len() - 1) as f32;
    let scores: BTreeMap<_, _> = WasteCategory::ALL
        .into_iter()
        .map(|c| (c, if c == category { confidence } else { rest }))
        .collect();
    ClassificationPrediction::new(category, confidence)?
        .with_subcategory(subcategory)?
        .with_raw_scores(scores)
}

/// Always returns the same prediction
struct FixedClassifier {
    category: WasteCategory,
    confidence: f32,
    subcategory: Option<WasteSubCategory>,
    loaded: AtomicBool,
}

impl FixedClassifier {
    fn new(category: WasteCategory, confidence: f32, subcategory: Option<WasteSubCategory>) -> Self {
        Self {
            category,
            confidence,
            subcategory,
            loaded: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn model_version(&self) -> &str {
        "0.0.1"
    }

    async fn load(&self) -> Result<()> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn predict(&self, _image: &PreparedImage) -> Result<ClassificationPrediction> {
        prediction(self.category, self.confidence, self.subcategory)
    }
}

/// Fails every prediction and counts attempts
#[derive(Default)]
struct FailingClassifier {
    calls: AtomicU32,
}

#[async_trait]
impl Classifier for FailingClassifier {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn model_version(&self) -> &str {
        "0.0.1"
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    async fn predict(&self, _image: &PreparedImage) -> Result<ClassificationPrediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::inference("GPU fell off the bus"))
    }
}

/// Derives the category from the image's red channel, sleeping longer for
/// earlier categories so completions arrive out of order.
struct ColourClassifier {
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl ColourClassifier {
    fn new() -> Self {
        Self {
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Classifier for ColourClassifier {
    fn model_name(&self) -> &str {
        "colour"
    }

    fn model_version(&self) -> &str {
        "0.0.1"
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    async fn predict(&self, image: &PreparedImage) -> Result<ClassificationPrediction> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let idx = (image.pixels().get_pixel(0, 0).0[0] / 40) as usize;
        let category = WasteCategory::ALL[idx.min(WasteCategory::ALL.len() - 1)];
        tokio::time::sleep(Duration::from_millis(60 - 10 * idx as u64)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        prediction(category, 0.9, None)
    }
}

/// Safety validator whose every call fails
struct BrokenSafety;

#[async_trait]
impl SafetyValidator for BrokenSafety {
    fn model_name(&self) -> &str {
        "broken-safety"
    }

    fn model_version(&self) -> &str {
        "0.0.1"
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    async fn validate(&self, _image: &PreparedImage) -> Result<SafetyCheckResult> {
        Err(Error::inference("safety model crashed"))
    }
}

/// Safety validator whose weights never load
struct UnloadableSafety;

#[async_trait]
impl SafetyValidator for UnloadableSafety {
    fn model_name(&self) -> &str {
        "unloadable-safety"
    }

    fn model_version(&self) -> &str {
        "0.0.1"
    }

    async fn load(&self) -> Result<()> {
        Err(Error::ModelUnavailable("weights missing".into()))
    }

    fn is_loaded(&self) -> bool {
        false
    }

    async fn validate(&self, _image: &PreparedImage) -> Result<SafetyCheckResult> {
        Err(Error::ModelNotLoaded(self.model_name().to_string()))
    }
}

fn passing_safety() -> Arc<dyn SafetyValidator> {
    Arc::new(MockSafetyValidator::with_seed(1.0, 7).unwrap())
}

fn solid(red: u8) -> ImageInput {
    ImageInput::from(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        32,
        32,
        Rgb([red, 10, 10]),
    )))
}

#[tokio::test]
async fn test_missing_image_yields_valid_result() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(MockClassifier::with_seed(42)),
        passing_safety(),
    )
    .build()
    .unwrap();

    let result = pipeline.classify(ImageInput::Missing).await.unwrap();

    assert!((0.0..=1.0).contains(&result.confidence()));
    assert_eq!(result.raw_scores().len(), WasteCategory::ALL.len());
    assert_eq!(
        result.requires_manual_review(),
        result.confidence_tier() == ConfidenceTier::Low || !result.safety_passed()
    );
    assert_eq!(
        result.requires_verification(),
        result.confidence_tier() == ConfidenceTier::Medium
    );
    assert!(result.processing_time_ms() >= 0.0);
}

#[tokio::test]
async fn test_medium_confidence_needs_verification_not_review() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(FixedClassifier::new(WasteCategory::Recyclable, 0.7, Some(WasteSubCategory::Glass))),
        passing_safety(),
    )
    .build()
    .unwrap();

    let result = pipeline.classify(solid(100)).await.unwrap();
    assert_eq!(result.confidence_tier(), ConfidenceTier::Medium);
    assert!(result.requires_verification());
    assert!(!result.requires_manual_review());
    assert_eq!(result.bin_type(), BinType::Blue);
}

#[tokio::test]
async fn test_battery_goes_to_red_bin() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(FixedClassifier::new(WasteCategory::Electronic, 0.95, Some(WasteSubCategory::Battery))),
        passing_safety(),
    )
    .build()
    .unwrap();

    let result = pipeline.classify(solid(10)).await.unwrap();
    assert_eq!(result.confidence_tier(), ConfidenceTier::High);
    assert_eq!(result.bin_type(), BinType::Red);
    assert_eq!(result.subcategory(), Some(WasteSubCategory::Battery));
}

#[tokio::test]
async fn test_custom_thresholds_apply() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(FixedClassifier::new(WasteCategory::Organic, 0.88, None)),
        passing_safety(),
    )
    .confidence(ConfidenceEngine::new(0.95, 0.5).unwrap())
    .build()
    .unwrap();

    let result = pipeline.classify(ImageInput::Missing).await.unwrap();
    assert_eq!(result.confidence_tier(), ConfidenceTier::Medium);
    assert_eq!(pipeline.get_model_info().confidence_thresholds.high, 0.95);
}

#[tokio::test]
async fn test_safety_failure_degrades() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(FixedClassifier::new(WasteCategory::Organic, 0.97, None)),
        Arc::new(BrokenSafety),
    )
    .build()
    .unwrap();

    let result = pipeline.classify(solid(50)).await.unwrap();
    assert_eq!(result.confidence_tier(), ConfidenceTier::High);
    assert!(!result.safety_passed());
    assert_eq!(result.safety_flags(), [SafetyCheckResult::UNAVAILABLE_FLAG]);
    assert!(result.requires_manual_review());
    assert_eq!(result.bin_type(), BinType::Green);
}

#[tokio::test]
async fn test_unloadable_safety_validator_degrades() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(MockClassifier::with_seed(3)),
        Arc::new(UnloadableSafety),
    )
    .build()
    .unwrap();

    pipeline.initialize().await.unwrap();
    let result = pipeline.classify(ImageInput::Missing).await.unwrap();
    assert!(!result.safety_passed());
    assert_eq!(result.safety_flags(), [SafetyCheckResult::UNAVAILABLE_FLAG]);
    assert!(result.requires_manual_review());

    let health = pipeline.health();
    assert!(health.ready);
    assert!(!health.safety_validator.loaded);
    assert!(health.is_degraded());
}

#[tokio::test]
async fn test_unloadable_classifier_fails_initialize() {
    struct UnloadableClassifier;

    #[async_trait]
    impl Classifier for UnloadableClassifier {
        fn model_name(&self) -> &str {
            "unloadable"
        }

        fn model_version(&self) -> &str {
            "0.0.1"
        }

        async fn load(&self) -> Result<()> {
            Err(Error::ModelUnavailable("weights missing".into()))
        }

        fn is_loaded(&self) -> bool {
            false
        }

        async fn predict(&self, _image: &PreparedImage) -> Result<ClassificationPrediction> {
            Err(Error::ModelNotLoaded(self.model_name().to_string()))
        }
    }

    let pipeline =
        ClassificationPipeline::builder(Arc::new(UnloadableClassifier), passing_safety())
            .build()
            .unwrap();

    let err = pipeline.classify(ImageInput::Missing).await.unwrap_err();
    assert!(matches!(err, Error::ModelUnavailable(_)));
    assert!(!pipeline.is_initialized());
}

#[tokio::test]
async fn test_open_safety_breaker_degrades() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(FixedClassifier::new(WasteCategory::General, 0.9, None)),
        passing_safety(),
    )
    .build()
    .unwrap();
    pipeline.safety_breaker().force_open();

    let result = pipeline.classify(solid(50)).await.unwrap();
    assert!(!result.safety_passed());
    assert!(result.requires_manual_review());
    assert_eq!(pipeline.breaker_metrics()[1].total_rejections, 1);
}

#[tokio::test]
async fn test_classifier_failures_propagate_and_trip_breaker() {
    let classifier = Arc::new(FailingClassifier::default());
    let pipeline = ClassificationPipeline::builder(classifier.clone(), passing_safety())
        .classifier_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        })
        .build()
        .unwrap();

    for _ in 0..3 {
        let err = pipeline.classify(solid(0)).await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }
    assert_eq!(pipeline.classifier_breaker().state(), CircuitState::Open);

    let err = pipeline.classify(solid(0)).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.retry_after().is_some());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);

    let health = pipeline.health();
    assert!(health.ready);
    assert!(health.is_degraded());
}

#[tokio::test(start_paused = true)]
async fn test_classifier_timeout() {
    let slow = MockClassifier::with_seed(1).with_latency(Duration::from_secs(10));
    let pipeline = ClassificationPipeline::builder(Arc::new(slow), passing_safety())
        .classifier_breaker(CircuitBreakerConfig {
            call_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        })
        .build()
        .unwrap();

    let err = pipeline.classify(ImageInput::Missing).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(pipeline.classifier_breaker().metrics().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_preserves_input_order() {
    let pipeline = ClassificationPipeline::builder(Arc::new(ColourClassifier::new()), passing_safety())
        .build()
        .unwrap();

    let inputs: Vec<ImageInput> = (0..6u8).map(|i| solid(i * 40 + 5)).collect();
    let results = pipeline.classify_batch(inputs).await.unwrap();

    let categories: Vec<_> = results.iter().map(|r| r.category()).collect();
    assert_eq!(categories, WasteCategory::ALL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_inference_concurrency_is_bounded() {
    let classifier = Arc::new(ColourClassifier::new());
    let pipeline = ClassificationPipeline::builder(classifier.clone(), passing_safety())
        .max_concurrent_inferences(1)
        .build()
        .unwrap();

    let inputs: Vec<ImageInput> = (0..4u8).map(|i| solid(i * 40)).collect();
    pipeline.classify_batch(inputs).await.unwrap();
    assert_eq!(classifier.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batch_stops_at_first_failure_but_settled_keeps_going() {
    let pipeline = ClassificationPipeline::builder(
        Arc::new(MockClassifier::with_seed(9)),
        passing_safety(),
    )
    .build()
    .unwrap();

    let batch = || {
        vec![
            ImageInput::Missing,
            ImageInput::from(b"definitely not an image".to_vec()),
            ImageInput::Missing,
        ]
    };

    let err = pipeline.classify_batch(batch()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidImage(_)));

    let settled = pipeline.classify_batch_settled(batch()).await;
    assert_eq!(settled.len(), 3);
    assert!(settled[0].is_ok());
    assert!(matches!(settled[1], Err(Error::InvalidImage(_))));
    assert!(settled[2].is_ok());
}

#[tokio::test]
async fn test_from_config_and_json_output() {
    let yaml = r#"
classifier:
  mock:
    seed: 21
safety:
  mock:
    pass_rate: 1.0
    seed: 21
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let pipeline = ClassificationPipeline::from_config(&config).await.unwrap();

    let health = pipeline.health();
    assert!(health.ready);
    assert!(!health.classifier.fallback);
    assert!(!health.is_degraded());

    let result = pipeline.classify(ImageInput::Missing).await.unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert!(json["bin_type"].is_string());
    assert!(json["confidence_tier"].is_string());
    assert_eq!(json["classifier_model"]["name"], "mock-waste-classifier");
    assert_eq!(json["safety_passed"], true);
}

#[cfg(feature = "ml-models")]
#[tokio::test]
async fn test_unloadable_model_falls_back_to_mock() {
    let yaml = r#"
classifier:
  variant: zero_shot
  zero_shot:
    source:
      path: /nonexistent/binwise/clip
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let pipeline = ClassificationPipeline::from_config(&config).await.unwrap();

    let health = pipeline.health();
    assert!(health.ready);
    assert!(health.classifier.fallback);
    assert!(health.is_degraded());
    assert_eq!(pipeline.get_model_info().classifier.name, "mock-waste-classifier");

    pipeline.classify(ImageInput::Missing).await.unwrap();
}
