//! Bin assignment

use binwise_core::{BinType, Error, Result, WasteCategory, WasteSubCategory};
use std::collections::HashMap;

/// Bin used when nothing else applies
pub const FALLBACK_BIN: BinType = BinType::Black;

/// Default bin per category
pub const DEFAULT_BINS: &[(WasteCategory, BinType)] = &[
    (WasteCategory::Organic, BinType::Green),
    (WasteCategory::Recyclable, BinType::Blue),
    (WasteCategory::Hazardous, BinType::Red),
    (WasteCategory::Electronic, BinType::Special),
    (WasteCategory::General, BinType::Black),
    (WasteCategory::Medical, BinType::Yellow),
];

/// Subcategories that leave their category's default bin
pub const SUBCATEGORY_OVERRIDES: &[(WasteSubCategory, BinType)] = &[
    (WasteSubCategory::Battery, BinType::Red),
    (WasteSubCategory::Textile, BinType::Special),
    (WasteSubCategory::Pharmaceutical, BinType::Red),
];

/// Resolves a (category, subcategory) prediction to a physical bin
#[derive(Debug, Clone)]
pub struct SegregationEngine {
    defaults: HashMap<WasteCategory, BinType>,
    overrides: HashMap<WasteSubCategory, BinType>,
}

impl SegregationEngine {
    /// Engine with the built-in tables
    pub fn new() -> Self {
        Self {
            defaults: DEFAULT_BINS.iter().copied().collect(),
            overrides: SUBCATEGORY_OVERRIDES.iter().copied().collect(),
        }
    }

    /// Engine with custom tables.
    ///
    /// Every category needs a default bin and no entry may repeat.
    pub fn with_tables(
        defaults: &[(WasteCategory, BinType)],
        overrides: &[(WasteSubCategory, BinType)],
    ) -> Result<Self> {
        let mut default_map = HashMap::new();
        for (category, bin) in defaults {
            if default_map.insert(*category, *bin).is_some() {
                return Err(Error::config(format!("duplicate default bin for {}", category)));
            }
        }
        if let Some(missing) = WasteCategory::ALL
            .into_iter()
            .find(|c| !default_map.contains_key(c))
        {
            return Err(Error::config(format!("no default bin for {}", missing)));
        }

        let mut override_map = HashMap::new();
        for (sub, bin) in overrides {
            if override_map.insert(*sub, *bin).is_some() {
                return Err(Error::config(format!("duplicate bin override for {}", sub)));
            }
        }

        Ok(Self {
            defaults: default_map,
            overrides: override_map,
        })
    }

    /// Bin for a prediction: subcategory override, then category default,
    /// then [`FALLBACK_BIN`].
    pub fn bin_for(&self, category: WasteCategory, subcategory: Option<WasteSubCategory>) -> BinType {
        if let Some(sub) = subcategory {
            if sub.category() != category {
                tracing::warn!(%category, subcategory = %sub, "Ignoring subcategory from another category");
            } else if let Some(bin) = self.overrides.get(&sub) {
                return *bin;
            }
        }

        self.defaults.get(&category).copied().unwrap_or(FALLBACK_BIN)
    }

    /// Short disposal instruction for a bin
    pub fn disposal_hint(&self, bin: BinType) -> &'static str {
        match bin {
            BinType::Green => "Compost bin: food scraps and garden waste.",
            BinType::Blue => "Recycling bin: rinse containers and flatten cardboard.",
            BinType::Red => {
                "Hazardous drop-off: batteries, chemicals and medicines. Never in household bins."
            }
            BinType::Black => "General waste bin.",
            BinType::Yellow => "Medical waste: sharps container or pharmacy return.",
            BinType::Special => "Special collection: e-waste or textile recycling point.",
        }
    }
}

impl Default for SegregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_bins() {
        let engine = SegregationEngine::new();
        assert_eq!(engine.bin_for(WasteCategory::Organic, None), BinType::Green);
        assert_eq!(engine.bin_for(WasteCategory::Recyclable, None), BinType::Blue);
        assert_eq!(engine.bin_for(WasteCategory::Hazardous, None), BinType::Red);
        assert_eq!(engine.bin_for(WasteCategory::Electronic, None), BinType::Special);
        assert_eq!(engine.bin_for(WasteCategory::General, None), BinType::Black);
        assert_eq!(engine.bin_for(WasteCategory::Medical, None), BinType::Yellow);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let engine = SegregationEngine::new();
        assert_eq!(
            engine.bin_for(WasteCategory::Electronic, Some(WasteSubCategory::Battery)),
            BinType::Red
        );
        assert_eq!(
            engine.bin_for(WasteCategory::General, Some(WasteSubCategory::Textile)),
            BinType::Special
        );
        assert_eq!(
            engine.bin_for(WasteCategory::Medical, Some(WasteSubCategory::Pharmaceutical)),
            BinType::Red
        );
        assert_eq!(
            engine.bin_for(WasteCategory::Electronic, Some(WasteSubCategory::Phone)),
            BinType::Special
        );
    }

    #[test]
    fn test_foreign_subcategory_ignored() {
        let engine = SegregationEngine::new();
        assert_eq!(
            engine.bin_for(WasteCategory::Organic, Some(WasteSubCategory::Battery)),
            BinType::Green
        );
    }

    #[test]
    fn test_table_validation() {
        let missing_medical = &DEFAULT_BINS[..5];
        assert!(SegregationEngine::with_tables(missing_medical, &[]).is_err());

        let mut duplicated = DEFAULT_BINS.to_vec();
        duplicated.push((WasteCategory::Organic, BinType::Black));
        assert!(SegregationEngine::with_tables(&duplicated, &[]).is_err());

        let overrides = [
            (WasteSubCategory::Glass, BinType::Special),
            (WasteSubCategory::Glass, BinType::Blue),
        ];
        assert!(SegregationEngine::with_tables(DEFAULT_BINS, &overrides).is_err());
    }

    #[test]
    fn test_custom_override() {
        let engine = SegregationEngine::with_tables(
            DEFAULT_BINS,
            &[(WasteSubCategory::Glass, BinType::Special)],
        )
        .unwrap();
        assert_eq!(
            engine.bin_for(WasteCategory::Recyclable, Some(WasteSubCategory::Glass)),
            BinType::Special
        );
        // Built-in overrides are replaced, not merged.
        assert_eq!(
            engine.bin_for(WasteCategory::Electronic, Some(WasteSubCategory::Battery)),
            BinType::Special
        );
    }

    #[test]
    fn test_every_bin_has_a_hint() {
        let engine = SegregationEngine::new();
        for bin in BinType::ALL {
            assert!(!engine.disposal_hint(bin).is_empty());
        }
    }

    fn any_prediction() -> impl Strategy<Value = (WasteCategory, Option<WasteSubCategory>)> {
        (0..WasteCategory::ALL.len()).prop_flat_map(|i| {
            let category = WasteCategory::ALL[i];
            let subs = category.subcategories();
            (Just(category), proptest::option::of(proptest::sample::select(subs)))
        })
    }

    proptest! {
        #[test]
        fn prop_non_override_uses_category_default((category, sub) in any_prediction()) {
            let engine = SegregationEngine::new();
            let bin = engine.bin_for(category, sub);
            let overridden = sub.and_then(|s| {
                SUBCATEGORY_OVERRIDES.iter().find(|(o, _)| *o == s).map(|(_, b)| *b)
            });
            let default = DEFAULT_BINS.iter().find(|(c, _)| *c == category).map(|(_, b)| *b);
            prop_assert_eq!(Some(bin), overridden.or(default));
        }
    }
}
