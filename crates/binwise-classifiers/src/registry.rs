//! Classifier and safety validator construction from configuration

use crate::classifier::{Classifier, SafetyValidator};
use crate::config::{
    ClassifierConfig, ClassifierVariant, MockSafetyConfig, SafetyConfig, SafetyVariant,
};
use crate::mock::MockClassifier;
use crate::safety::{ImageQualityValidator, MockSafetyValidator};
use binwise_core::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// A ready-to-use component and whether it replaced the configured one
pub struct Initialized<T: ?Sized> {
    pub component: Arc<T>,
    /// True when the configured variant failed and a mock stands in
    pub fallback: bool,
}

/// Instantiate the configured classifier without loading it
pub fn build_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    config.validate()?;
    match config.variant {
        ClassifierVariant::Mock => Ok(Arc::new(mock_classifier(config))),
        #[cfg(feature = "ml-models")]
        ClassifierVariant::ZeroShot => {
            Ok(Arc::new(crate::zero_shot::ZeroShotClassifier::new(config)?))
        }
        #[cfg(feature = "ml-models")]
        ClassifierVariant::Lightweight => {
            Ok(Arc::new(crate::lightweight::LightweightClassifier::new(config)?))
        }
        #[cfg(not(feature = "ml-models"))]
        other => Err(Error::model_unavailable(format!(
            "classifier variant {:?} requires the ml-models feature",
            other
        ))),
    }
}

/// Instantiate the configured safety validator without loading it
pub fn build_safety_validator(config: &SafetyConfig) -> Result<Arc<dyn SafetyValidator>> {
    match config.variant {
        SafetyVariant::Mock => {
            let validator = match config.mock.seed {
                Some(seed) => MockSafetyValidator::with_seed(config.mock.pass_rate, seed)?,
                None => MockSafetyValidator::new(config.mock.pass_rate)?,
            };
            Ok(Arc::new(validator))
        }
        SafetyVariant::Quality => Ok(Arc::new(ImageQualityValidator::new(
            config.quality.clone(),
        )?)),
    }
}

/// Build and load the configured classifier.
///
/// If the configured variant cannot be built or loaded, a loaded
/// [`MockClassifier`] is returned instead and `fallback` is set. The mock
/// itself cannot fail to load, so this only errors on invalid configuration.
pub async fn init_classifier(config: &ClassifierConfig) -> Result<Initialized<dyn Classifier>> {
    let attempt = async {
        let classifier = build_classifier(config)?;
        classifier.load().await?;
        Ok::<_, Error>(classifier)
    };

    match attempt.await {
        Ok(classifier) => {
            info!(
                "Classifier ready: {} v{}",
                classifier.model_name(),
                classifier.model_version()
            );
            Ok(Initialized {
                component: classifier,
                fallback: false,
            })
        }
        Err(e @ Error::Config(_)) => Err(e),
        Err(e) => {
            warn!(
                "Failed to initialize {:?} classifier, falling back to mock: {}",
                config.variant, e
            );
            let mock = mock_classifier(config);
            mock.load().await?;
            Ok(Initialized {
                component: Arc::new(mock),
                fallback: true,
            })
        }
    }
}

/// Build and load the configured safety validator, falling back to the mock
/// validator at its default pass rate.
pub async fn init_safety_validator(
    config: &SafetyConfig,
) -> Result<Initialized<dyn SafetyValidator>> {
    let attempt = async {
        let validator = build_safety_validator(config)?;
        validator.load().await?;
        Ok::<_, Error>(validator)
    };

    match attempt.await {
        Ok(validator) => {
            info!(
                "Safety validator ready: {} v{}",
                validator.model_name(),
                validator.model_version()
            );
            Ok(Initialized {
                component: validator,
                fallback: false,
            })
        }
        Err(e @ Error::Config(_)) => Err(e),
        Err(e) => {
            warn!(
                "Failed to initialize {:?} safety validator, falling back to mock: {}",
                config.variant, e
            );
            let mock = MockSafetyValidator::new(MockSafetyConfig::default().pass_rate)?;
            mock.load().await?;
            Ok(Initialized {
                component: Arc::new(mock),
                fallback: true,
            })
        }
    }
}

fn mock_classifier(config: &ClassifierConfig) -> MockClassifier {
    match config.mock.seed {
        Some(seed) => MockClassifier::with_seed(seed),
        None => MockClassifier::new(),
    }
}
