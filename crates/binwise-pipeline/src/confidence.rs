//! Confidence tiering

use binwise_core::{ConfidenceThresholds, ConfidenceTier, Error, Result};

/// Default lower bound of the HIGH tier
pub const DEFAULT_HIGH_THRESHOLD: f32 = 0.85;
/// Default lower bound of the MEDIUM tier
pub const DEFAULT_MEDIUM_THRESHOLD: f32 = 0.60;

/// Maps a classifier confidence onto an operational tier.
///
/// HIGH results are acted on directly, MEDIUM results ask the user to
/// confirm, LOW results go to manual review.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceEngine {
    high: f32,
    medium: f32,
}

impl ConfidenceEngine {
    /// Both thresholds must lie strictly inside (0, 1) with `high > medium`
    pub fn new(high: f32, medium: f32) -> Result<Self> {
        for (name, value) in [("high", high), ("medium", medium)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(Error::config(format!(
                    "{} confidence threshold {} must be strictly between 0 and 1",
                    name, value
                )));
            }
        }
        if high <= medium {
            return Err(Error::config(format!(
                "high threshold {} must exceed medium threshold {}",
                high, medium
            )));
        }
        Ok(Self { high, medium })
    }

    pub fn tier(&self, confidence: f32) -> ConfidenceTier {
        // NaN fails both comparisons and lands in LOW.
        if confidence >= self.high {
            ConfidenceTier::High
        } else if confidence >= self.medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn requires_verification(&self, confidence: f32) -> bool {
        self.tier(confidence) == ConfidenceTier::Medium
    }

    pub fn requires_manual_review(&self, confidence: f32) -> bool {
        self.tier(confidence) == ConfidenceTier::Low
    }

    pub fn thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            high: self.high,
            medium: self.medium,
        }
    }
}

impl Default for ConfidenceEngine {
    fn default() -> Self {
        Self {
            high: DEFAULT_HIGH_THRESHOLD,
            medium: DEFAULT_MEDIUM_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries_are_inclusive() {
        let engine = ConfidenceEngine::default();
        assert_eq!(engine.tier(0.85), ConfidenceTier::High);
        assert_eq!(engine.tier(0.8499), ConfidenceTier::Medium);
        assert_eq!(engine.tier(0.60), ConfidenceTier::Medium);
        assert_eq!(engine.tier(0.5999), ConfidenceTier::Low);
        assert_eq!(engine.tier(1.0), ConfidenceTier::High);
        assert_eq!(engine.tier(0.0), ConfidenceTier::Low);
    }

    #[test]
    fn test_nan_is_low() {
        let engine = ConfidenceEngine::default();
        assert_eq!(engine.tier(f32::NAN), ConfidenceTier::Low);
        assert!(engine.requires_manual_review(f32::NAN));
    }

    #[test]
    fn test_medium_needs_verification_only() {
        let engine = ConfidenceEngine::default();
        assert!(engine.requires_verification(0.7));
        assert!(!engine.requires_manual_review(0.7));
        assert!(!engine.requires_verification(0.9));
        assert!(!engine.requires_verification(0.3));
        assert!(engine.requires_manual_review(0.3));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        assert!(ConfidenceEngine::new(0.6, 0.85).is_err());
        assert!(ConfidenceEngine::new(0.7, 0.7).is_err());
        assert!(ConfidenceEngine::new(1.0, 0.5).is_err());
        assert!(ConfidenceEngine::new(0.9, 0.0).is_err());
        assert!(ConfidenceEngine::new(f32::NAN, 0.5).is_err());
        assert!(matches!(
            ConfidenceEngine::new(0.5, 0.6),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_custom_thresholds() {
        let engine = ConfidenceEngine::new(0.9, 0.5).unwrap();
        assert_eq!(engine.tier(0.89), ConfidenceTier::Medium);
        assert_eq!(engine.thresholds().high, 0.9);
        assert_eq!(engine.thresholds().medium, 0.5);
    }

    proptest! {
        #[test]
        fn prop_tier_is_monotonic(a in 0.0f32..=1.0, b in 0.0f32..=1.0) {
            let engine = ConfidenceEngine::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let rank = |t: ConfidenceTier| match t {
                ConfidenceTier::Low => 0,
                ConfidenceTier::Medium => 1,
                ConfidenceTier::High => 2,
            };
            prop_assert!(rank(engine.tier(lo)) <= rank(engine.tier(hi)));
        }

        #[test]
        fn prop_flags_partition_tiers(c in 0.0f32..=1.0) {
            let engine = ConfidenceEngine::default();
            let verify = engine.requires_verification(c);
            let review = engine.requires_manual_review(c);
            prop_assert!(!(verify && review));
            prop_assert_eq!(engine.tier(c) == ConfidenceTier::High, !verify && !review);
        }
    }
}
