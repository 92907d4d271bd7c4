//! Classification pipeline orchestration
//!
//! Stages, in order:
//! 1. Decode and normalize the image (invalid input fails here)
//! 2. Classify behind the classifier breaker (failures propagate)
//! 3. Safety check behind the safety breaker (failures degrade)
//! 4. Confidence tier
//! 5. Bin assignment
//!
//! followed by assembly of the [`PipelineResult`].

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::confidence::ConfidenceEngine;
use crate::config::PipelineConfig;
use crate::segregation::SegregationEngine;
use binwise_classifiers::{init_classifier, init_safety_validator, Classifier, SafetyValidator};
use binwise_core::{
    Error, ImageInput, ImagePreprocessor, ModelDescriptor, ModelInfo, PipelineResult,
    PreparedImage, Result, SafetyCheckResult, DEFAULT_TARGET_SIZE,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, instrument, warn};

/// Breaker name for the classifier dependency
pub const CLASSIFIER_BREAKER: &str = "classifier";
/// Breaker name for the safety validator dependency
pub const SAFETY_BREAKER: &str = "safety";

/// Readiness of one model-backed component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub model: ModelDescriptor,
    pub loaded: bool,
    /// The configured model failed and the mock is serving instead
    pub fallback: bool,
}

/// Readiness summary of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineHealth {
    /// Initialized with a loaded classifier; classification can proceed
    pub ready: bool,
    pub classifier: ComponentHealth,
    pub safety_validator: ComponentHealth,
    pub breakers: Vec<CircuitBreakerMetrics>,
}

impl PipelineHealth {
    /// Serving, but on a fallback model, without safety checks, or with a
    /// breaker not closed
    pub fn is_degraded(&self) -> bool {
        self.classifier.fallback
            || self.safety_validator.fallback
            || !self.safety_validator.loaded
            || self.breakers.iter().any(|b| b.state != CircuitState::Closed)
    }
}

/// Builder for [`ClassificationPipeline`]
pub struct PipelineBuilder {
    classifier: Arc<dyn Classifier>,
    safety: Arc<dyn SafetyValidator>,
    confidence: ConfidenceEngine,
    segregation: SegregationEngine,
    classifier_breaker: CircuitBreakerConfig,
    safety_breaker: CircuitBreakerConfig,
    max_concurrent_inferences: usize,
    target_size: u32,
    classifier_fallback: bool,
    safety_fallback: bool,
}

impl PipelineBuilder {
    pub fn new(classifier: Arc<dyn Classifier>, safety: Arc<dyn SafetyValidator>) -> Self {
        Self {
            classifier,
            safety,
            confidence: ConfidenceEngine::default(),
            segregation: SegregationEngine::default(),
            classifier_breaker: CircuitBreakerConfig::default(),
            safety_breaker: CircuitBreakerConfig::default(),
            max_concurrent_inferences: num_cpus::get(),
            target_size: DEFAULT_TARGET_SIZE,
            classifier_fallback: false,
            safety_fallback: false,
        }
    }

    pub fn confidence(mut self, engine: ConfidenceEngine) -> Self {
        self.confidence = engine;
        self
    }

    pub fn segregation(mut self, engine: SegregationEngine) -> Self {
        self.segregation = engine;
        self
    }

    pub fn classifier_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.classifier_breaker = config;
        self
    }

    pub fn safety_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.safety_breaker = config;
        self
    }

    pub fn max_concurrent_inferences(mut self, limit: usize) -> Self {
        self.max_concurrent_inferences = limit;
        self
    }

    pub fn target_size(mut self, size: u32) -> Self {
        self.target_size = size;
        self
    }

    fn fallbacks(mut self, classifier: bool, safety: bool) -> Self {
        self.classifier_fallback = classifier;
        self.safety_fallback = safety;
        self
    }

    pub fn build(self) -> Result<ClassificationPipeline> {
        if self.max_concurrent_inferences == 0 {
            return Err(Error::config("max_concurrent_inferences must be at least 1"));
        }

        Ok(ClassificationPipeline {
            classifier: self.classifier,
            safety: self.safety,
            confidence: self.confidence,
            segregation: self.segregation,
            preprocessor: ImagePreprocessor::new(self.target_size)?,
            classifier_breaker: CircuitBreaker::new(CLASSIFIER_BREAKER, self.classifier_breaker)?,
            safety_breaker: CircuitBreaker::new(SAFETY_BREAKER, self.safety_breaker)?,
            inference_slots: Semaphore::new(self.max_concurrent_inferences),
            initialized: OnceCell::new(),
            classifier_fallback: self.classifier_fallback,
            safety_fallback: self.safety_fallback,
        })
    }
}

/// Turns waste photos into disposal decisions.
///
/// Construct once and share behind an `Arc`; all methods take `&self`.
pub struct ClassificationPipeline {
    classifier: Arc<dyn Classifier>,
    safety: Arc<dyn SafetyValidator>,
    confidence: ConfidenceEngine,
    segregation: SegregationEngine,
    preprocessor: ImagePreprocessor,
    classifier_breaker: CircuitBreaker,
    safety_breaker: CircuitBreaker,
    inference_slots: Semaphore,
    initialized: OnceCell<()>,
    classifier_fallback: bool,
    safety_fallback: bool,
}

impl ClassificationPipeline {
    pub fn builder(
        classifier: Arc<dyn Classifier>,
        safety: Arc<dyn SafetyValidator>,
    ) -> PipelineBuilder {
        PipelineBuilder::new(classifier, safety)
    }

    /// Build from configuration, loading both models.
    ///
    /// A configured model that fails to load is replaced by its mock; see
    /// [`PipelineHealth`] for whether that happened.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let classifier = init_classifier(&config.classifier).await?;
        let safety = init_safety_validator(&config.safety).await?;

        let pipeline = PipelineBuilder::new(classifier.component, safety.component)
            .confidence(config.confidence.engine()?)
            .classifier_breaker(config.breakers.classifier.to_breaker_config()?)
            .safety_breaker(config.breakers.safety.to_breaker_config()?)
            .max_concurrent_inferences(config.max_concurrent_inferences)
            .target_size(config.target_size)
            .fallbacks(classifier.fallback, safety.fallback)
            .build()?;

        pipeline.initialize().await?;
        Ok(pipeline)
    }

    /// Load both models. Idempotent; concurrent callers share one load.
    ///
    /// Only a classifier load failure is returned. A validator that fails to
    /// load stays unloaded and every result carries the unavailable flag.
    pub async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                self.classifier.load().await?;
                if let Err(e) = self.safety.load().await {
                    tracing::warn!(
                        safety = %self.safety.model_name(),
                        error = %e,
                        "Safety validator failed to load, safety checks will be skipped"
                    );
                    metrics::counter!("binwise_safety_load_failures_total").increment(1);
                }
                tracing::info!(
                    classifier = %self.classifier.model_name(),
                    safety = %self.safety.model_name(),
                    "Pipeline initialized"
                );
                Ok::<_, Error>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Classify one image
    #[instrument(skip_all)]
    pub async fn classify(&self, input: impl Into<ImageInput>) -> Result<PipelineResult> {
        let started = Instant::now();

        let result = self.run_stages(input.into(), started).await;
        match &result {
            Ok(r) => {
                metrics::counter!(
                    "binwise_classifications_total",
                    "category" => r.category().as_str(),
                    "tier" => r.confidence_tier().as_str()
                )
                .increment(1);
                metrics::histogram!("binwise_classification_latency_ms")
                    .record(r.processing_time_ms());
            }
            Err(e) => {
                metrics::counter!("binwise_classification_errors_total", "kind" => error_kind(e))
                    .increment(1);
            }
        }
        result
    }

    async fn run_stages(&self, input: ImageInput, started: Instant) -> Result<PipelineResult> {
        let image = self.prepare(input).await?;
        debug!(placeholder = image.is_placeholder(), "Image prepared");

        self.initialize().await?;

        let prediction = {
            let _slot = self.inference_slot().await?;
            self.classifier_breaker
                .call(|| self.classifier.predict(&image))
                .await?
        };
        debug!(
            category = %prediction.category(),
            confidence = prediction.confidence(),
            "Classifier prediction"
        );

        let safety = self.check_safety(&image).await;
        debug!(passed = safety.passed(), flags = ?safety.flags(), "Safety check");

        let tier = self.confidence.tier(prediction.confidence());
        let bin = self
            .segregation
            .bin_for(prediction.category(), prediction.subcategory());
        debug!(%tier, %bin, "Decision");

        Ok(PipelineResult::assemble(
            prediction,
            tier,
            bin,
            safety,
            started.elapsed().as_secs_f64() * 1000.0,
            self.classifier.descriptor(),
            self.safety.descriptor(),
        ))
    }

    async fn prepare(&self, input: ImageInput) -> Result<PreparedImage> {
        match input {
            ImageInput::Encoded(_) => {
                let preprocessor = self.preprocessor.clone();
                tokio::task::spawn_blocking(move || preprocessor.prepare(input))
                    .await
                    .map_err(|e| Error::internal(format!("image decode task failed: {}", e)))?
            }
            other => self.preprocessor.prepare(other),
        }
    }

    async fn check_safety(&self, image: &PreparedImage) -> SafetyCheckResult {
        let outcome = match self.inference_slot().await {
            Ok(_slot) => {
                self.safety_breaker
                    .call(|| self.safety.validate(image))
                    .await
            }
            Err(e) => Err(e),
        };

        outcome.unwrap_or_else(|e| {
            warn!(error = %e, "Safety check unavailable, flagging for review");
            metrics::counter!("binwise_safety_degraded_total", "kind" => error_kind(&e))
                .increment(1);
            SafetyCheckResult::unavailable()
        })
    }

    async fn inference_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.inference_slots
            .acquire()
            .await
            .map_err(|_| Error::internal("inference limiter closed"))
    }

    /// Classify several images concurrently, in input order.
    ///
    /// Fails with the first error encountered; remaining work is dropped.
    pub async fn classify_batch<I>(&self, inputs: I) -> Result<Vec<PipelineResult>>
    where
        I: IntoIterator,
        I::Item: Into<ImageInput>,
    {
        futures::future::try_join_all(inputs.into_iter().map(|input| self.classify(input))).await
    }

    /// Classify several images, keeping one outcome per input in order
    pub async fn classify_batch_settled<I>(&self, inputs: I) -> Vec<Result<PipelineResult>>
    where
        I: IntoIterator,
        I::Item: Into<ImageInput>,
    {
        futures::future::join_all(inputs.into_iter().map(|input| self.classify(input))).await
    }

    pub fn get_model_info(&self) -> ModelInfo {
        ModelInfo {
            classifier: self.classifier.descriptor(),
            safety_validator: self.safety.descriptor(),
            confidence_thresholds: self.confidence.thresholds(),
        }
    }

    /// Snapshots of the classifier and safety breakers, in that order
    pub fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        vec![self.classifier_breaker.metrics(), self.safety_breaker.metrics()]
    }

    pub fn health(&self) -> PipelineHealth {
        let classifier = ComponentHealth {
            model: self.classifier.descriptor(),
            loaded: self.classifier.is_loaded(),
            fallback: self.classifier_fallback,
        };
        let safety_validator = ComponentHealth {
            model: self.safety.descriptor(),
            loaded: self.safety.is_loaded(),
            fallback: self.safety_fallback,
        };

        PipelineHealth {
            ready: self.is_initialized() && classifier.loaded,
            classifier,
            safety_validator,
            breakers: self.breaker_metrics(),
        }
    }

    pub fn confidence_engine(&self) -> &ConfidenceEngine {
        &self.confidence
    }

    pub fn segregation_engine(&self) -> &SegregationEngine {
        &self.segregation
    }

    pub fn classifier_breaker(&self) -> &CircuitBreaker {
        &self.classifier_breaker
    }

    pub fn safety_breaker(&self) -> &CircuitBreaker {
        &self.safety_breaker
    }
}

fn error_kind(e: &Error) -> &'static str {
    match e {
        Error::ModelUnavailable(_) => "model_unavailable",
        Error::ModelNotLoaded(_) => "model_not_loaded",
        Error::Inference(_) => "inference",
        Error::BreakerOpen { .. } => "breaker_open",
        Error::InvalidImage(_) => "invalid_image",
        Error::Config(_) => "config",
        Error::Timeout { .. } => "timeout",
        Error::Io(_) => "io",
        Error::Internal(_) => "internal",
    }
}
