//! Binwise Pipeline
//!
//! Turns a waste photo into a disposal decision: category, bin, confidence
//! tier and safety flags. Inference dependencies sit behind circuit breakers
//! so a failing model degrades the service instead of taking it down.
//!
//! ```no_run
//! use binwise_pipeline::{ClassificationPipeline, PipelineConfig};
//!
//! # async fn run(photo: Vec<u8>) -> binwise_core::Result<()> {
//! let pipeline = ClassificationPipeline::from_config(&PipelineConfig::default()).await?;
//! let result = pipeline.classify(photo).await?;
//! println!("{} -> {} bin", result.category(), result.bin_type());
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod confidence;
pub mod config;
pub mod pipeline;
pub mod segregation;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, DEFAULT_CALL_TIMEOUT,
};
pub use confidence::ConfidenceEngine;
pub use config::{BreakerSettings, BreakersConfig, ConfidenceConfig, PipelineConfig};
pub use pipeline::{
    ClassificationPipeline, ComponentHealth, PipelineBuilder, PipelineHealth, CLASSIFIER_BREAKER,
    SAFETY_BREAKER,
};
pub use segregation::SegregationEngine;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitState};
    pub use crate::pipeline::ClassificationPipeline;
    pub use crate::config::PipelineConfig;
    pub use binwise_core::prelude::*;
}
