//! Classifier and safety validator traits

use async_trait::async_trait;
use binwise_core::{
    ClassificationPrediction, ModelDescriptor, PreparedImage, Result, SafetyCheckResult,
};

/// An image classifier producing a waste category prediction.
///
/// Implementations must be loaded before use: `predict` on an unloaded
/// classifier fails with [`binwise_core::Error::ModelNotLoaded`] rather than
/// loading implicitly. `load` is idempotent and safe to call concurrently;
/// concurrent callers share one load.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the model version
    fn model_version(&self) -> &str;

    /// Load weights and any precomputed state
    async fn load(&self) -> Result<()>;

    /// Whether `load` has completed successfully
    fn is_loaded(&self) -> bool;

    /// Classify a single normalized image
    async fn predict(&self, image: &PreparedImage) -> Result<ClassificationPrediction>;

    /// Classify several images, preserving input order
    async fn predict_batch(&self, images: &[PreparedImage]) -> Result<Vec<ClassificationPrediction>> {
        let mut predictions = Vec::with_capacity(images.len());
        for image in images {
            predictions.push(self.predict(image).await?);
        }
        Ok(predictions)
    }

    /// Name and version pair
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.model_name(), self.model_version())
    }
}

/// An independent image quality/content check.
///
/// Shares the load policy of [`Classifier`].
#[async_trait]
pub trait SafetyValidator: Send + Sync {
    fn model_name(&self) -> &str;

    fn model_version(&self) -> &str;

    async fn load(&self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Inspect a normalized image
    async fn validate(&self, image: &PreparedImage) -> Result<SafetyCheckResult>;

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.model_name(), self.model_version())
    }
}
