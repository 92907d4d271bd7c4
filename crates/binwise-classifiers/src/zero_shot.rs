//! Zero-shot waste classification with CLIP
//!
//! Every category and subcategory is described by one or more text prompts.
//! Prompt embeddings are computed once at load time; each prediction embeds
//! the image and compares it against the cached prompt matrix.

use crate::classifier::Classifier;
use crate::config::{ClassifierConfig, ZeroShotConfig};
use crate::model_loader::{
    create_device, inference_error, l2_normalize, load_error, load_safetensors, DeviceType,
    ModelSource,
};
use async_trait::async_trait;
use binwise_core::{
    ClassificationPrediction, Error, PreparedImage, Result, WasteCategory, WasteSubCategory,
};
use candle_core::{Device, Tensor};
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;

const MODEL_NAME: &str = "clip-vit-base-patch32-zero-shot";
const MODEL_VERSION: &str = "1.0.0";

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

const PAD_TOKEN: &str = "<|endoftext|>";

/// A text description of one category or subcategory
#[derive(Debug, Clone, Copy)]
pub struct Prompt {
    pub category: WasteCategory,
    pub subcategory: Option<WasteSubCategory>,
    pub text: &'static str,
}

const fn prompt(
    category: WasteCategory,
    subcategory: Option<WasteSubCategory>,
    text: &'static str,
) -> Prompt {
    Prompt {
        category,
        subcategory,
        text,
    }
}

use WasteCategory as C;
use WasteSubCategory as S;

/// Built-in prompt table
pub const PROMPTS: &[Prompt] = &[
    prompt(C::Organic, None, "a photo of organic compost waste"),
    prompt(C::Organic, Some(S::FoodWaste), "a photo of leftover food scraps"),
    prompt(C::Organic, Some(S::FoodWaste), "a photo of fruit and vegetable peels"),
    prompt(C::Organic, Some(S::GardenWaste), "a photo of grass clippings, leaves and branches"),
    prompt(C::Recyclable, None, "a photo of recyclable packaging"),
    prompt(C::Recyclable, Some(S::Plastic), "a photo of an empty plastic bottle"),
    prompt(C::Recyclable, Some(S::Plastic), "a photo of plastic food containers"),
    prompt(C::Recyclable, Some(S::Paper), "a photo of old newspapers and paper"),
    prompt(C::Recyclable, Some(S::Glass), "a photo of an empty glass bottle or jar"),
    prompt(C::Recyclable, Some(S::Metal), "a photo of an empty aluminium can"),
    prompt(C::Recyclable, Some(S::Cardboard), "a photo of a flattened cardboard box"),
    prompt(C::Hazardous, None, "a photo of hazardous household waste"),
    prompt(C::Hazardous, Some(S::Chemical), "a photo of a bottle of household chemicals"),
    prompt(C::Hazardous, Some(S::Paint), "a photo of a used paint can"),
    prompt(C::Hazardous, Some(S::Aerosol), "a photo of an aerosol spray can"),
    prompt(C::Electronic, None, "a photo of electronic waste"),
    prompt(C::Electronic, Some(S::Battery), "a photo of used batteries"),
    prompt(C::Electronic, Some(S::Phone), "a photo of an old mobile phone"),
    prompt(C::Electronic, Some(S::Computer), "a photo of a broken laptop or computer"),
    prompt(C::Electronic, Some(S::SmallAppliance), "a photo of a broken kitchen appliance"),
    prompt(C::General, None, "a photo of general household rubbish"),
    prompt(C::General, Some(S::Mixed), "a photo of a bag of mixed rubbish"),
    prompt(C::General, Some(S::Textile), "a photo of old clothes and fabric"),
    prompt(C::General, Some(S::Ceramic), "a photo of broken ceramic plates"),
    prompt(C::Medical, None, "a photo of medical waste"),
    prompt(C::Medical, Some(S::Sharps), "a photo of used syringes and needles"),
    prompt(C::Medical, Some(S::Pharmaceutical), "a photo of expired medicine and pill packs"),
    prompt(C::Medical, Some(S::Ppe), "a photo of used face masks and gloves"),
];

/// Check that a prompt table covers every category and subcategory and is
/// internally consistent.
pub fn validate_prompts(prompts: &[Prompt]) -> Result<()> {
    for p in prompts {
        if let Some(sub) = p.subcategory {
            if sub.category() != p.category {
                return Err(Error::config(format!(
                    "prompt '{}' pairs {} with {}",
                    p.text, sub, p.category
                )));
            }
        }
    }
    for category in WasteCategory::ALL {
        if !prompts.iter().any(|p| p.category == category) {
            return Err(Error::config(format!("no prompt describes {}", category)));
        }
    }
    for sub in WasteSubCategory::ALL {
        if !prompts.iter().any(|p| p.subcategory == Some(sub)) {
            return Err(Error::config(format!("no prompt describes {}", sub)));
        }
    }
    Ok(())
}

/// Softmax over raw logits, numerically stabilized
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Turn prompt similarities into a prediction.
///
/// A category scores the best similarity among its prompts; category scores
/// are divided by `temperature` and softmaxed. The subcategory is the best
/// matching subcategory prompt inside the winning category.
pub fn score_prompts(
    similarities: &[f32],
    prompts: &[Prompt],
    temperature: f32,
) -> Result<ClassificationPrediction> {
    if similarities.len() != prompts.len() {
        return Err(Error::inference(format!(
            "got {} similarities for {} prompts",
            similarities.len(),
            prompts.len()
        )));
    }

    let logits: Vec<f32> = WasteCategory::ALL
        .iter()
        .map(|category| {
            prompts
                .iter()
                .zip(similarities)
                .filter(|(p, _)| p.category == *category)
                .map(|(_, s)| *s)
                .fold(f32::NEG_INFINITY, f32::max)
                / temperature
        })
        .collect();
    if logits.iter().any(|l| !l.is_finite()) {
        return Err(Error::inference("non-finite prompt similarity"));
    }

    let probs = softmax(&logits);
    let (winner_idx, confidence) = probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| Error::internal("empty category list"))?;
    let category = WasteCategory::ALL[winner_idx];

    let subcategory = prompts
        .iter()
        .zip(similarities)
        .filter(|(p, _)| p.category == category)
        .filter_map(|(p, s)| p.subcategory.map(|sub| (sub, *s)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(sub, _)| sub);

    let raw_scores: BTreeMap<WasteCategory, f32> =
        WasteCategory::ALL.into_iter().zip(probs).collect();

    ClassificationPrediction::new(category, confidence)?
        .with_subcategory(subcategory)?
        .with_raw_scores(raw_scores)
}

struct ClipState {
    model: ClipModel,
    /// Normalized prompt embeddings, `[prompts, dim]`
    text_features: Tensor,
    image_size: usize,
    device: Device,
}

impl ClipState {
    fn load(config: &ZeroShotConfig, cache_dir: PathBuf, device: DeviceType) -> Result<Self> {
        let source = ModelSource::from_spec(&config.source, &cache_dir);
        let weights = source.resolve(&config.weights_file)?;
        let tokenizer_path = source.resolve(&config.tokenizer_file)?;

        let device = create_device(device)?;
        let clip_config = ClipConfig::vit_base_patch32();
        let vb = load_safetensors(&weights, &device)?;
        let model = ClipModel::new(vb, &clip_config).map_err(load_error)?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            Error::model_unavailable(format!(
                "Failed to load tokenizer {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;
        let input_ids = tokenize_prompts(&tokenizer, PROMPTS, &device)?;
        let text_features = model
            .get_text_features(&input_ids)
            .and_then(|t| l2_normalize(&t))
            .map_err(load_error)?;

        Ok(Self {
            model,
            text_features,
            image_size: clip_config.image_size,
            device,
        })
    }

    fn similarities(&self, pixels: Vec<f32>) -> Result<Vec<f32>> {
        let size = self.image_size;
        let run = || -> candle_core::Result<Vec<f32>> {
            let image = Tensor::from_vec(pixels, (3, size, size), &self.device)?.unsqueeze(0)?;
            let image_features = l2_normalize(&self.model.get_image_features(&image)?)?;
            image_features
                .matmul(&self.text_features.t()?)?
                .squeeze(0)?
                .to_vec1::<f32>()
        };
        run().map_err(inference_error)
    }
}

fn tokenize_prompts(tokenizer: &Tokenizer, prompts: &[Prompt], device: &Device) -> Result<Tensor> {
    let pad_id = *tokenizer
        .get_vocab(true)
        .get(PAD_TOKEN)
        .ok_or_else(|| Error::model_unavailable(format!("tokenizer has no {} token", PAD_TOKEN)))?;

    let mut ids = Vec::with_capacity(prompts.len());
    for p in prompts {
        let encoding = tokenizer
            .encode(p.text, true)
            .map_err(|e| Error::model_unavailable(format!("Failed to tokenize prompt: {}", e)))?;
        ids.push(encoding.get_ids().to_vec());
    }

    let max_len = ids.iter().map(Vec::len).max().unwrap_or(0);
    for row in ids.iter_mut() {
        row.resize(max_len, pad_id);
    }

    Tensor::new(ids, device).map_err(load_error)
}

/// CLIP-based zero-shot classifier
pub struct ZeroShotClassifier {
    config: ZeroShotConfig,
    cache_dir: PathBuf,
    device: DeviceType,
    state: OnceCell<Arc<ClipState>>,
}

impl ZeroShotClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        config.validate()?;
        validate_prompts(PROMPTS)?;
        Ok(Self {
            config: config.zero_shot.clone(),
            cache_dir: config.cache_dir.clone(),
            device: DeviceType::from(&config.device),
            state: OnceCell::new(),
        })
    }
}

#[async_trait]
impl Classifier for ZeroShotClassifier {
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
                tracing::info!("Loading {} ({} prompts)", MODEL_NAME, PROMPTS.len());

                let state = tokio::task::spawn_blocking(move || {
                    ClipState::load(&config, cache_dir, device)
                })
                .await
                .map_err(|e| Error::internal(format!("model load task failed: {}", e)))??;

                tracing::info!("Loaded {} v{}", MODEL_NAME, MODEL_VERSION);
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

        let size = state.image_size as u32;
        if image.width() != size || image.height() != size {
            return Err(Error::inference(format!(
                "expected a {}x{} image, got {}x{}",
                size,
                size,
                image.width(),
                image.height()
            )));
        }

        let pixels = image.to_chw(CLIP_MEAN, CLIP_STD);
        let similarities = tokio::task::spawn_blocking(move || state.similarities(pixels))
            .await
            .map_err(|e| Error::internal(format!("inference task failed: {}", e)))??;

        score_prompts(&similarities, PROMPTS, self.config.temperature)
    }
}
