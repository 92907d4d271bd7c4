//! Binwise Core
//!
//! Core types, image preprocessing, and error handling shared across binwise
//! components.
//!
//! This crate provides:
//! - The closed waste/bin/tier enumerations that form the wire contract
//! - Prediction, safety and pipeline result records
//! - Image decoding and normalization to model resolution
//! - Error types and result handling

pub mod error;
pub mod imaging;
pub mod types;

pub use error::{Error, Result};
pub use imaging::{ImageInput, ImagePreprocessor, PreparedImage, DEFAULT_TARGET_SIZE};
pub use types::{
    BinType, ClassificationPrediction, ConfidenceThresholds, ConfidenceTier, ModelDescriptor,
    ModelInfo, PipelineResult, SafetyCheckResult, WasteCategory, WasteSubCategory,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::imaging::{ImageInput, PreparedImage};
    pub use crate::types::{
        BinType, ClassificationPrediction, ConfidenceTier, PipelineResult, SafetyCheckResult,
        WasteCategory, WasteSubCategory,
    };
}
