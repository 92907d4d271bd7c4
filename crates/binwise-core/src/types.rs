//! Core domain types for binwise
//!
//! The enumerations in this module are closed sets whose serialized names are
//! the wire contract with persistence and reward collaborators. Variants are
//! never renamed, renumbered or reordered once deployed.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Allowed deviation of a raw-score distribution from 1.0
pub const RAW_SCORE_TOLERANCE: f32 = 0.01;

/// Top-level waste category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WasteCategory {
    Organic,
    Recyclable,
    Hazardous,
    Electronic,
    General,
    Medical,
}

impl WasteCategory {
    /// Every category, in contract order
    pub const ALL: [WasteCategory; 6] = [
        Self::Organic,
        Self::Recyclable,
        Self::Hazardous,
        Self::Electronic,
        Self::General,
        Self::Medical,
    ];

    /// Wire name of this category
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organic => "ORGANIC",
            Self::Recyclable => "RECYCLABLE",
            Self::Hazardous => "HAZARDOUS",
            Self::Electronic => "ELECTRONIC",
            Self::General => "GENERAL",
            Self::Medical => "MEDICAL",
        }
    }

    /// Subcategories that may accompany this category
    pub fn subcategories(&self) -> &'static [WasteSubCategory] {
        use WasteSubCategory::*;
        match self {
            Self::Organic => &[FoodWaste, GardenWaste],
            Self::Recyclable => &[Plastic, Paper, Glass, Metal, Cardboard],
            Self::Hazardous => &[Chemical, Paint, Aerosol],
            Self::Electronic => &[Battery, Phone, Computer, SmallAppliance],
            Self::General => &[Mixed, Textile, Ceramic],
            Self::Medical => &[Sharps, Pharmaceutical, Ppe],
        }
    }

    /// Whether `sub` is a valid refinement of this category
    pub fn admits(&self, sub: WasteSubCategory) -> bool {
        sub.category() == *self
    }
}

impl fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WasteCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::config(format!("unknown waste category '{}'", s)))
    }
}

/// Subcategory refining a [`WasteCategory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WasteSubCategory {
    // Organic
    FoodWaste,
    GardenWaste,
    // Recyclable
    Plastic,
    Paper,
    Glass,
    Metal,
    Cardboard,
    // Hazardous
    Chemical,
    Paint,
    Aerosol,
    // Electronic
    Battery,
    Phone,
    Computer,
    SmallAppliance,
    // General
    Mixed,
    Textile,
    Ceramic,
    // Medical
    Sharps,
    Pharmaceutical,
    Ppe,
}

impl WasteSubCategory {
    /// Every subcategory, in contract order
    pub const ALL: [WasteSubCategory; 20] = [
        Self::FoodWaste,
        Self::GardenWaste,
        Self::Plastic,
        Self::Paper,
        Self::Glass,
        Self::Metal,
        Self::Cardboard,
        Self::Chemical,
        Self::Paint,
        Self::Aerosol,
        Self::Battery,
        Self::Phone,
        Self::Computer,
        Self::SmallAppliance,
        Self::Mixed,
        Self::Textile,
        Self::Ceramic,
        Self::Sharps,
        Self::Pharmaceutical,
        Self::Ppe,
    ];

    /// The single category this subcategory belongs to
    pub fn category(&self) -> WasteCategory {
        match self {
            Self::FoodWaste | Self::GardenWaste => WasteCategory::Organic,
            Self::Plastic | Self::Paper | Self::Glass | Self::Metal | Self::Cardboard => {
                WasteCategory::Recyclable
            }
            Self::Chemical | Self::Paint | Self::Aerosol => WasteCategory::Hazardous,
            Self::Battery | Self::Phone | Self::Computer | Self::SmallAppliance => {
                WasteCategory::Electronic
            }
            Self::Mixed | Self::Textile | Self::Ceramic => WasteCategory::General,
            Self::Sharps | Self::Pharmaceutical | Self::Ppe => WasteCategory::Medical,
        }
    }

    /// Wire name of this subcategory
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FoodWaste => "FOOD_WASTE",
            Self::GardenWaste => "GARDEN_WASTE",
            Self::Plastic => "PLASTIC",
            Self::Paper => "PAPER",
            Self::Glass => "GLASS",
            Self::Metal => "METAL",
            Self::Cardboard => "CARDBOARD",
            Self::Chemical => "CHEMICAL",
            Self::Paint => "PAINT",
            Self::Aerosol => "AEROSOL",
            Self::Battery => "BATTERY",
            Self::Phone => "PHONE",
            Self::Computer => "COMPUTER",
            Self::SmallAppliance => "SMALL_APPLIANCE",
            Self::Mixed => "MIXED",
            Self::Textile => "TEXTILE",
            Self::Ceramic => "CERAMIC",
            Self::Sharps => "SHARPS",
            Self::Pharmaceutical => "PHARMACEUTICAL",
            Self::Ppe => "PPE",
        }
    }
}

impl fmt::Display for WasteSubCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WasteSubCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::config(format!("unknown waste subcategory '{}'", s)))
    }
}

/// Physical collection receptacle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinType {
    Green,
    Blue,
    Red,
    Black,
    Yellow,
    Special,
}

impl BinType {
    pub const ALL: [BinType; 6] = [
        Self::Green,
        Self::Blue,
        Self::Red,
        Self::Black,
        Self::Yellow,
        Self::Special,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Blue => "BLUE",
            Self::Red => "RED",
            Self::Black => "BLACK",
            Self::Yellow => "YELLOW",
            Self::Special => "SPECIAL",
        }
    }
}

impl fmt::Display for BinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational confidence tier derived from a raw probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    /// Automated decision
    High,
    /// Decision shown to the user for confirmation
    Medium,
    /// Routed to manual review
    Low,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_unit_interval(value: f32, what: &str) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::inference(format!("{} {} is outside [0, 1]", what, value)))
    }
}

/// Raw output of a single classifier inference call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationPrediction {
    category: WasteCategory,
    confidence: f32,
    subcategory: Option<WasteSubCategory>,
    raw_scores: Option<BTreeMap<WasteCategory, f32>>,
}

impl ClassificationPrediction {
    /// Create a prediction, validating the confidence range
    pub fn new(category: WasteCategory, confidence: f32) -> Result<Self> {
        check_unit_interval(confidence, "confidence")?;
        Ok(Self {
            category,
            confidence,
            subcategory: None,
            raw_scores: None,
        })
    }

    /// Attach a subcategory; it must belong to the predicted category
    pub fn with_subcategory(mut self, subcategory: Option<WasteSubCategory>) -> Result<Self> {
        if let Some(sub) = subcategory {
            if !self.category.admits(sub) {
                return Err(Error::inference(format!(
                    "subcategory {} does not belong to category {}",
                    sub, self.category
                )));
            }
        }
        self.subcategory = subcategory;
        Ok(self)
    }

    /// Attach the full per-category distribution.
    ///
    /// Every category must be present, each score in [0, 1], and the total
    /// within [`RAW_SCORE_TOLERANCE`] of 1.0.
    pub fn with_raw_scores(mut self, scores: BTreeMap<WasteCategory, f32>) -> Result<Self> {
        for category in WasteCategory::ALL {
            let score = scores.get(&category).ok_or_else(|| {
                Error::inference(format!("raw scores are missing category {}", category))
            })?;
            check_unit_interval(*score, "raw score")?;
        }

        let total: f32 = scores.values().sum();
        if (total - 1.0).abs() > RAW_SCORE_TOLERANCE {
            return Err(Error::inference(format!(
                "raw scores sum to {:.4}, expected 1.0",
                total
            )));
        }

        self.raw_scores = Some(scores);
        Ok(self)
    }

    pub fn category(&self) -> WasteCategory {
        self.category
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn subcategory(&self) -> Option<WasteSubCategory> {
        self.subcategory
    }

    pub fn raw_scores(&self) -> Option<&BTreeMap<WasteCategory, f32>> {
        self.raw_scores.as_ref()
    }
}

/// Outcome of the safety/quality inspection of an image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyCheckResult {
    passed: bool,
    flags: Vec<String>,
    confidence: f32,
}

impl SafetyCheckResult {
    /// Flag recorded when the validator could not run at all
    pub const UNAVAILABLE_FLAG: &'static str = "safety_check_unavailable";

    /// A passing check (no flags)
    pub fn pass(confidence: f32) -> Result<Self> {
        check_unit_interval(confidence, "safety confidence")?;
        Ok(Self {
            passed: true,
            flags: Vec::new(),
            confidence,
        })
    }

    /// A failing check; at least one flag is required
    pub fn fail<I, S>(flags: I, confidence: f32) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        check_unit_interval(confidence, "safety confidence")?;
        let flags: Vec<String> = flags.into_iter().map(Into::into).collect();
        if flags.is_empty() {
            return Err(Error::inference("a failed safety check must carry a flag"));
        }
        Ok(Self {
            passed: false,
            flags,
            confidence,
        })
    }

    /// The degraded result used when the validator itself is down
    pub fn unavailable() -> Self {
        Self {
            passed: false,
            flags: vec![Self::UNAVAILABLE_FLAG.to_string()],
            confidence: 0.0,
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Name and version of a loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub version: String,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Configured confidence thresholds, as reported to health checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub high: f32,
    pub medium: f32,
}

/// Introspection record for health/readiness reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub classifier: ModelDescriptor,
    pub safety_validator: ModelDescriptor,
    pub confidence_thresholds: ConfidenceThresholds,
}

/// The externally visible disposal decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    category: WasteCategory,
    subcategory: Option<WasteSubCategory>,
    confidence: f32,
    confidence_tier: ConfidenceTier,
    bin_type: BinType,
    raw_scores: BTreeMap<WasteCategory, f32>,
    safety_passed: bool,
    safety_flags: Vec<String>,
    requires_verification: bool,
    requires_manual_review: bool,
    processing_time_ms: f64,
    classifier_model: ModelDescriptor,
    safety_model: ModelDescriptor,
}

impl PipelineResult {
    /// Assemble the final decision.
    ///
    /// `requires_verification` is set for MEDIUM tier; `requires_manual_review`
    /// is set for LOW tier or a failed safety check.
    pub fn assemble(
        prediction: ClassificationPrediction,
        tier: ConfidenceTier,
        bin_type: BinType,
        safety: SafetyCheckResult,
        processing_time_ms: f64,
        classifier_model: ModelDescriptor,
        safety_model: ModelDescriptor,
    ) -> Self {
        let requires_verification = tier == ConfidenceTier::Medium;
        let requires_manual_review = tier == ConfidenceTier::Low || !safety.passed;

        Self {
            category: prediction.category,
            subcategory: prediction.subcategory,
            confidence: prediction.confidence,
            confidence_tier: tier,
            bin_type,
            raw_scores: prediction.raw_scores.unwrap_or_default(),
            safety_passed: safety.passed,
            safety_flags: safety.flags,
            requires_verification,
            requires_manual_review,
            processing_time_ms,
            classifier_model,
            safety_model,
        }
    }

    pub fn category(&self) -> WasteCategory {
        self.category
    }

    pub fn subcategory(&self) -> Option<WasteSubCategory> {
        self.subcategory
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn confidence_tier(&self) -> ConfidenceTier {
        self.confidence_tier
    }

    pub fn bin_type(&self) -> BinType {
        self.bin_type
    }

    pub fn raw_scores(&self) -> &BTreeMap<WasteCategory, f32> {
        &self.raw_scores
    }

    pub fn safety_passed(&self) -> bool {
        self.safety_passed
    }

    pub fn safety_flags(&self) -> &[String] {
        &self.safety_flags
    }

    pub fn requires_verification(&self) -> bool {
        self.requires_verification
    }

    pub fn requires_manual_review(&self) -> bool {
        self.requires_manual_review
    }

    pub fn processing_time_ms(&self) -> f64 {
        self.processing_time_ms
    }

    pub fn classifier_model(&self) -> &ModelDescriptor {
        &self.classifier_model
    }

    pub fn safety_model(&self) -> &ModelDescriptor {
        &self.safety_model
    }
}
