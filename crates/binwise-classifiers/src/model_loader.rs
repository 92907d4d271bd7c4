//! Model file resolution and device setup for Candle-based classifiers

use crate::config::{DeviceSpec, ModelSourceSpec};
use binwise_core::{Error, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// CPU inference (always available)
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize),
    /// Metal (Apple Silicon)
    Metal(usize),
}

impl From<&DeviceSpec> for DeviceType {
    fn from(spec: &DeviceSpec) -> Self {
        match spec {
            DeviceSpec::Cpu => Self::Cpu,
            DeviceSpec::Cuda { index } => Self::Cuda(index.unwrap_or(0)),
            DeviceSpec::Metal { index } => Self::Metal(index.unwrap_or(0)),
        }
    }
}

/// Source location for model files
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Directory on the local file system
    LocalDir(PathBuf),

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
        cache_dir: PathBuf,
    },
}

impl ModelSource {
    /// Build a source from its config form
    pub fn from_spec(spec: &ModelSourceSpec, cache_dir: &Path) -> Self {
        match spec {
            ModelSourceSpec::Local { path } => Self::LocalDir(path.clone()),
            ModelSourceSpec::HuggingFace { repo_id, revision } => Self::HuggingFace {
                repo_id: repo_id.clone(),
                revision: revision.clone(),
                cache_dir: cache_dir.to_path_buf(),
            },
        }
    }

    /// Resolve `filename` to a local path, downloading it if needed.
    ///
    /// Blocking; call from a blocking context.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        match self {
            Self::LocalDir(dir) => {
                let path = dir.join(filename);
                if !path.exists() {
                    return Err(Error::model_unavailable(format!(
                        "Model file not found: {}",
                        path.display()
                    )));
                }
                Ok(path)
            }
            Self::HuggingFace {
                repo_id,
                revision,
                cache_dir,
            } => {
                let api = ApiBuilder::new()
                    .with_cache_dir(cache_dir.clone())
                    .build()
                    .map_err(|e| {
                        Error::model_unavailable(format!("Failed to initialize HF API: {}", e))
                    })?;

                let repo = api.repo(Repo::with_revision(
                    repo_id.clone(),
                    RepoType::Model,
                    revision.clone().unwrap_or_else(|| "main".to_string()),
                ));

                tracing::debug!("Fetching {} from {}", filename, repo_id);
                repo.get(filename).map_err(|e| {
                    Error::model_unavailable(format!(
                        "Failed to download {} from {}: {}",
                        filename, repo_id, e
                    ))
                })
            }
        }
    }
}

/// Create Candle device from device type
pub fn create_device(device_type: DeviceType) -> Result<Device> {
    match device_type {
        DeviceType::Cpu => Ok(Device::Cpu),
        DeviceType::Cuda(idx) => Device::new_cuda(idx).map_err(|e| {
            Error::model_unavailable(format!("Failed to create CUDA device: {}", e))
        }),
        DeviceType::Metal(idx) => Device::new_metal(idx).map_err(|e| {
            Error::model_unavailable(format!("Failed to create Metal device: {}", e))
        }),
    }
}

/// Memory-map SafeTensors weights into a VarBuilder
pub fn load_safetensors(weights: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    // SAFETY: the weights file is opened read-only and is not modified while mapped.
    unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights.to_path_buf()], DType::F32, device)
    }
    .map_err(|e| {
        Error::model_unavailable(format!(
            "Failed to load SafeTensors {}: {}",
            weights.display(),
            e
        ))
    })
}

/// Map a candle error raised during a forward pass
pub fn inference_error(e: candle_core::Error) -> Error {
    Error::inference(format!("forward pass failed: {}", e))
}

/// Map a candle error raised while building a model
pub fn load_error(e: candle_core::Error) -> Error {
    Error::model_unavailable(format!("failed to build model: {}", e))
}

/// Divide each row by its L2 norm
pub fn l2_normalize(v: &Tensor) -> candle_core::Result<Tensor> {
    let norm = v.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
    v.broadcast_div(&norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_source_missing_file() {
        let source = ModelSource::LocalDir(PathBuf::from("/definitely/not/here"));
        let err = source.resolve("model.safetensors").unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable(_)));
    }

    #[test]
    fn test_source_from_spec() {
        let spec = ModelSourceSpec::HuggingFace {
            repo_id: "org/model".to_string(),
            revision: None,
        };
        let source = ModelSource::from_spec(&spec, Path::new("/tmp/cache"));
        if let ModelSource::HuggingFace {
            repo_id, cache_dir, ..
        } = source
        {
            assert_eq!(repo_id, "org/model");
            assert_eq!(cache_dir, PathBuf::from("/tmp/cache"));
        } else {
            panic!("Expected HuggingFace source");
        }
    }

    #[test]
    fn test_device_conversion() {
        assert_eq!(DeviceType::from(&DeviceSpec::Cpu), DeviceType::Cpu);
        assert_eq!(
            DeviceType::from(&DeviceSpec::Cuda { index: Some(1) }),
            DeviceType::Cuda(1)
        );
        assert_eq!(
            DeviceType::from(&DeviceSpec::Metal { index: None }),
            DeviceType::Metal(0)
        );
    }

    #[test]
    fn test_l2_normalize_rows() {
        let t = Tensor::new(&[[3f32, 4.0], [0.0, 2.0]], &Device::Cpu).unwrap();
        let n = l2_normalize(&t).unwrap().to_vec2::<f32>().unwrap();
        assert!((n[0][0] - 0.6).abs() < 1e-6 && (n[0][1] - 0.8).abs() < 1e-6);
        assert!((n[1][1] - 1.0).abs() < 1e-6);
    }
}
