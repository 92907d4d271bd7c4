//! Binwise Classifiers
//!
//! Pluggable waste-image classifiers and safety validators.
//!
//! Classifier variants:
//! - Mock: realistic random predictions, no external resources
//! - Zero-shot: CLIP image/text similarity against category prompts
//! - Lightweight: EfficientNet-B0 with an ImageNet-to-waste mapping
//!
//! The Candle-backed variants live behind the `ml-models` feature. When a
//! configured model cannot be loaded, [`registry::init_classifier`] falls
//! back to the mock so the service keeps answering.

pub mod classifier;
pub mod config;
#[cfg(feature = "ml-models")]
pub mod lightweight;
pub mod mock;
#[cfg(feature = "ml-models")]
pub mod model_loader;
pub mod registry;
pub mod safety;
#[cfg(feature = "ml-models")]
pub mod zero_shot;

pub use classifier::{Classifier, SafetyValidator};
pub use config::{
    ClassifierConfig, ClassifierVariant, DeviceSpec, ModelSourceSpec, QualityConfig,
    SafetyConfig, SafetyVariant,
};
#[cfg(feature = "ml-models")]
pub use lightweight::LightweightClassifier;
pub use mock::MockClassifier;
pub use registry::{
    build_classifier, build_safety_validator, init_classifier, init_safety_validator, Initialized,
};
pub use safety::{ImageQualityValidator, MockSafetyValidator};
#[cfg(feature = "ml-models")]
pub use zero_shot::ZeroShotClassifier;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{Classifier, SafetyValidator};
    pub use crate::mock::MockClassifier;
    pub use crate::safety::{ImageQualityValidator, MockSafetyValidator};
}
