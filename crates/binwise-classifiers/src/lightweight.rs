//! Lightweight CNN classifier
//!
//! Runs an ImageNet EfficientNet-B0 and folds the top-k ImageNet classes
//! onto waste categories through a fixed mapping table. Classes without a
//! mapping are ignored. Cheap enough for CPU-only deployments.

use crate::classifier::Classifier;
use crate::config::{ClassifierConfig, LightweightConfig};
use crate::model_loader::{
    create_device, inference_error, load_error, load_safetensors, DeviceType, ModelSource,
};
use async_trait::async_trait;
use binwise_core::{
    ClassificationPrediction, Error, PreparedImage, Result, WasteCategory, WasteSubCategory,
};
use candle_core::{Device, Module, Tensor, D};
use candle_transformers::models::efficientnet::{EfficientNet, MBConvConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

const MODEL_NAME: &str = "efficientnet-b0-waste";
const MODEL_VERSION: &str = "1.0.0";

const IMAGENET_CLASSES: usize = 1000;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Confidence reported when nothing recognisable was found
pub const UNRECOGNISED_CONFIDENCE: f32 = 0.35;

/// One ImageNet class mapped onto the waste taxonomy
#[derive(Debug, Clone, Copy)]
pub struct ImageNetMapping {
    pub class_index: usize,
    pub category: WasteCategory,
    pub subcategory: Option<WasteSubCategory>,
}

const fn map(
    class_index: usize,
    category: WasteCategory,
    subcategory: Option<WasteSubCategory>,
) -> ImageNetMapping {
    ImageNetMapping {
        class_index,
        category,
        subcategory,
    }
}

use WasteCategory as C;
use WasteSubCategory as S;

/// ImageNet-1k classes that say something about how an object is disposed of
pub const IMAGENET_MAP: &[ImageNetMapping] = &[
    // bottles, jars and cans
    map(440, C::Recyclable, Some(S::Glass)),   // beer bottle
    map(441, C::Recyclable, Some(S::Glass)),   // beer glass
    map(907, C::Recyclable, Some(S::Glass)),   // wine bottle
    map(898, C::Recyclable, Some(S::Plastic)), // water bottle
    map(899, C::Recyclable, Some(S::Plastic)), // water jug
    map(737, C::Recyclable, Some(S::Plastic)), // pop bottle
    map(463, C::Recyclable, Some(S::Plastic)), // bucket
    map(653, C::Recyclable, Some(S::Metal)),   // milk can
    map(478, C::Recyclable, Some(S::Cardboard)), // carton
    map(549, C::Recyclable, Some(S::Paper)),   // envelope
    map(917, C::Recyclable, Some(S::Paper)),   // comic book
    map(921, C::Recyclable, Some(S::Paper)),   // book jacket
    map(922, C::Recyclable, Some(S::Paper)),   // menu
    // bags and bins
    map(728, C::General, Some(S::Mixed)), // plastic bag
    map(692, C::General, Some(S::Mixed)), // packet
    map(412, C::General, Some(S::Mixed)), // ashcan
    map(999, C::General, Some(S::Mixed)), // toilet tissue
    map(911, C::General, Some(S::Textile)), // wool
    map(610, C::General, Some(S::Textile)), // jersey
    map(841, C::General, Some(S::Textile)), // sweatshirt
    map(869, C::General, Some(S::Textile)), // trench coat
    map(849, C::General, Some(S::Ceramic)), // teapot
    map(968, C::General, Some(S::Ceramic)), // cup
    map(504, C::General, Some(S::Ceramic)), // coffee mug
    // food
    map(954, C::Organic, Some(S::FoodWaste)), // banana
    map(948, C::Organic, Some(S::FoodWaste)), // Granny Smith
    map(950, C::Organic, Some(S::FoodWaste)), // orange
    map(951, C::Organic, Some(S::FoodWaste)), // lemon
    map(953, C::Organic, Some(S::FoodWaste)), // pineapple
    map(949, C::Organic, Some(S::FoodWaste)), // strawberry
    map(937, C::Organic, Some(S::FoodWaste)), // broccoli
    map(936, C::Organic, Some(S::FoodWaste)), // head cabbage
    map(943, C::Organic, Some(S::FoodWaste)), // cucumber
    map(945, C::Organic, Some(S::FoodWaste)), // bell pepper
    map(947, C::Organic, Some(S::FoodWaste)), // mushroom
    map(987, C::Organic, Some(S::FoodWaste)), // corn
    map(963, C::Organic, Some(S::FoodWaste)), // pizza
    map(933, C::Organic, Some(S::FoodWaste)), // cheeseburger
    map(934, C::Organic, Some(S::FoodWaste)), // hotdog
    map(930, C::Organic, Some(S::FoodWaste)), // French loaf
    map(931, C::Organic, Some(S::FoodWaste)), // bagel
    map(965, C::Organic, Some(S::FoodWaste)), // burrito
    map(988, C::Organic, Some(S::GardenWaste)), // acorn
    // electronics
    map(487, C::Electronic, Some(S::Phone)),    // cellular telephone
    map(620, C::Electronic, Some(S::Computer)), // laptop
    map(527, C::Electronic, Some(S::Computer)), // desktop computer
    map(508, C::Electronic, Some(S::Computer)), // computer keyboard
    map(673, C::Electronic, Some(S::Computer)), // mouse
    map(664, C::Electronic, Some(S::Computer)), // monitor
    map(761, C::Electronic, Some(S::SmallAppliance)), // remote control
    map(605, C::Electronic, Some(S::SmallAppliance)), // iPod
    map(851, C::Electronic, Some(S::SmallAppliance)), // television
    map(632, C::Electronic, Some(S::SmallAppliance)), // loudspeaker
    map(859, C::Electronic, Some(S::SmallAppliance)), // toaster
    map(651, C::Electronic, Some(S::SmallAppliance)), // microwave
    map(550, C::Electronic, Some(S::SmallAppliance)), // espresso maker
    map(589, C::Electronic, Some(S::SmallAppliance)), // hand blower
    // medical
    map(845, C::Medical, Some(S::Sharps)),         // syringe
    map(720, C::Medical, Some(S::Pharmaceutical)), // pill bottle
    map(570, C::Medical, Some(S::Ppe)),            // gasmask
    map(643, C::Medical, Some(S::Ppe)),            // mask
    map(419, C::Medical, None),                    // Band Aid
    // hazardous
    map(626, C::Hazardous, None),                 // lighter
    map(585, C::Hazardous, Some(S::Aerosol)),     // hair spray
    map(696, C::Hazardous, Some(S::Paint)),       // paintbrush
    map(686, C::Hazardous, Some(S::Chemical)),    // oil filter
];

/// Check class indices and category/subcategory agreement
pub fn validate_mapping(table: &[ImageNetMapping]) -> Result<()> {
    for entry in table {
        if entry.class_index >= IMAGENET_CLASSES {
            return Err(Error::config(format!(
                "ImageNet class {} is out of range",
                entry.class_index
            )));
        }
        if let Some(sub) = entry.subcategory {
            if sub.category() != entry.category {
                return Err(Error::config(format!(
                    "ImageNet class {} pairs {} with {}",
                    entry.class_index, sub, entry.category
                )));
            }
        }
    }
    Ok(())
}

/// Fold ImageNet probabilities onto waste categories.
///
/// Only the `top_k` most probable classes are considered, and a mapped class
/// contributes only when its probability reaches `min_confidence`. Each
/// category accumulates the mass of its contributing classes; the mass nobody
/// claimed is shared evenly so the raw scores form a distribution. The
/// winner's subcategory comes from its most probable contributing class that
/// names one.
///
/// When no class contributes the image is reported as GENERAL with
/// [`UNRECOGNISED_CONFIDENCE`].
pub fn aggregate(
    probs: &[f32],
    table: &[ImageNetMapping],
    top_k: usize,
    min_confidence: f32,
) -> Result<ClassificationPrediction> {
    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top_k);

    let mut mass: BTreeMap<WasteCategory, f32> = BTreeMap::new();
    let mut best_sub: BTreeMap<WasteCategory, (WasteSubCategory, f32)> = BTreeMap::new();

    for (class_index, p) in ranked {
        if p < min_confidence {
            continue;
        }
        let Some(entry) = table.iter().find(|m| m.class_index == class_index) else {
            continue;
        };
        *mass.entry(entry.category).or_insert(0.0) += p;
        if let Some(sub) = entry.subcategory {
            let slot = best_sub.entry(entry.category).or_insert((sub, p));
            if p > slot.1 {
                *slot = (sub, p);
            }
        }
    }

    let category_count = WasteCategory::ALL.len() as f32;

    let Some((&winner, _)) = mass.iter().max_by(|a, b| a.1.total_cmp(b.1)) else {
        let share = (1.0 - UNRECOGNISED_CONFIDENCE) / (category_count - 1.0);
        let raw_scores = WasteCategory::ALL
            .into_iter()
            .map(|c| {
                let score = if c == WasteCategory::General {
                    UNRECOGNISED_CONFIDENCE
                } else {
                    share
                };
                (c, score)
            })
            .collect();
        return ClassificationPrediction::new(WasteCategory::General, UNRECOGNISED_CONFIDENCE)?
            .with_raw_scores(raw_scores);
    };

    let claimed: f32 = mass.values().sum();
    let share = (1.0 - claimed).max(0.0) / category_count;
    let raw_scores: BTreeMap<WasteCategory, f32> = WasteCategory::ALL
        .into_iter()
        .map(|c| (c, (mass.get(&c).copied().unwrap_or(0.0) + share).min(1.0)))
        .collect();
    let confidence = raw_scores[&winner];

    ClassificationPrediction::new(winner, confidence)?
        .with_subcategory(best_sub.get(&winner).map(|(sub, _)| *sub))?
        .with_raw_scores(raw_scores)
}

struct EfficientNetState {
    model: EfficientNet,
    device: Device,
}

impl EfficientNetState {
    fn load(config: &LightweightConfig, cache_dir: PathBuf, device: DeviceType) -> Result<Self> {
        let source = ModelSource::from_spec(&config.source, &cache_dir);
        let weights = source.resolve(&config.weights_file)?;

        let device = create_device(device)?;
        let vb = load_safetensors(&weights, &device)?;
        let model =
            EfficientNet::new(vb, MBConvConfig::b0(), IMAGENET_CLASSES).map_err(load_error)?;

        Ok(Self { model, device })
    }

    fn probabilities(&self, pixels: Vec<f32>, height: usize, width: usize) -> Result<Vec<f32>> {
        let run = || -> candle_core::Result<Vec<f32>> {
            let image = Tensor::from_vec(pixels, (3, height, width), &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&image)?;
            candle_nn::ops::softmax(&logits, D::Minus1)?
                .squeeze(0)?
                .to_vec1::<f32>()
        };
        run().map_err(inference_error)
    }
}

/// EfficientNet-B0 classifier with an ImageNet-to-waste mapping
pub struct LightweightClassifier {
    config: LightweightConfig,
    cache_dir: PathBuf,
    device: DeviceType,
    state: OnceCell<Arc<EfficientNetState>>,
}

impl LightweightClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        config.validate()?;
        validate_mapping(IMAGENET_MAP)?;
        Ok(Self {
            config: config.lightweight.clone(),
            cache_dir: config.cache_dir.clone(),
            device: DeviceType::from(&config.device),
            state: OnceCell::new(),
        })
    }
}

#[async_trait]
impl Classifier for LightweightClassifier {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn model_version(&self) -> &str {
        MODEL_VERSION
    }

    async fn load(&self) -> Result<()> {
        self.state
            .get_or_try_init(|| async {
                let config = self.config.clone();
                let cache_dir = self.cache_dir.clone();
                let device = self.device;
                tracing::info!("Loading {}", MODEL_NAME);

                let state = tokio::task::spawn_blocking(move || {
                    EfficientNetState::load(&config, cache_dir, device)
                })
                .await
                .map_err(|e| Error::internal(format!("model load task failed: {}", e)))??;

                tracing::info!(
                    "Loaded {} v{} ({} mapped classes)",
                    MODEL_NAME,
                    MODEL_VERSION,
                    IMAGENET_MAP.len()
                );
                Ok::<_, Error>(Arc::new(state))
            })
            .await?;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.state.initialized()
    }

    async fn predict(&self, image: &PreparedImage) -> Result<ClassificationPrediction> {
        let state = self
            .state
            .get()
            .cloned()
            .ok_or_else(|| Error::not_loaded(MODEL_NAME))?;

        let (height, width) = (image.height() as usize, image.width() as usize);
        let pixels = image.to_chw(IMAGENET_MEAN, IMAGENET_STD);
        let probs = tokio::task::spawn_blocking(move || state.probabilities(pixels, height, width))
            .await
            .map_err(|e| Error::internal(format!("inference task failed: {}", e)))??;

        if probs.len() != IMAGENET_CLASSES {
            return Err(Error::inference(format!(
                "expected {} class probabilities, got {}",
                IMAGENET_CLASSES,
                probs.len()
            )));
        }

        let prediction = aggregate(
            &probs,
            IMAGENET_MAP,
            self.config.top_k,
            self.config.min_confidence,
        )?;
        tracing::debug!(
            category = %prediction.category(),
            confidence = prediction.confidence(),
            "EfficientNet prediction"
        );
        Ok(prediction)
    }
}
