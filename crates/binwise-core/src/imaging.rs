//! Image decoding and normalization for model input
//!
//! Every model sees the same thing: a square RGB image at the configured
//! target size. Decoding failures are reported as [`Error::InvalidImage`] so
//! they can be rejected before any model call.

use crate::{Error, Result};
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;

/// Default square edge length expected by the bundled models
pub const DEFAULT_TARGET_SIZE: u32 = 224;

/// Inputs larger than this are rejected before decoding
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Grey level used for the placeholder image
const PLACEHOLDER_LEVEL: u8 = 128;

/// Image handed to the pipeline by a collaborator
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Encoded bytes (PNG, JPEG, WebP, ...)
    Encoded(Bytes),
    /// An already decoded image
    Decoded(DynamicImage),
    /// No image was supplied; a deterministic placeholder is used
    Missing,
}

impl From<Bytes> for ImageInput {
    fn from(bytes: Bytes) -> Self {
        Self::Encoded(bytes)
    }
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Encoded(Bytes::from(bytes))
    }
}

impl From<&[u8]> for ImageInput {
    fn from(bytes: &[u8]) -> Self {
        Self::Encoded(Bytes::copy_from_slice(bytes))
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(image: DynamicImage) -> Self {
        Self::Decoded(image)
    }
}

impl<T: Into<ImageInput>> From<Option<T>> for ImageInput {
    fn from(input: Option<T>) -> Self {
        input.map(Into::into).unwrap_or(Self::Missing)
    }
}

/// A normalized, square RGB image ready for inference.
///
/// Cloning is cheap; pixel data is shared.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pixels: Arc<RgbImage>,
    placeholder: bool,
}

impl PreparedImage {
    /// Uniform mid-grey image used when no input was supplied
    pub fn placeholder(size: u32) -> Self {
        Self {
            pixels: Arc::new(RgbImage::from_pixel(size, size, Rgb([PLACEHOLDER_LEVEL; 3]))),
            placeholder: true,
        }
    }

    /// Wrap pixels that are already at model resolution
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            placeholder: false,
        }
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Whether this image is the synthetic placeholder
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Channel-first float buffer, `(value / 255 - mean) / std` per channel.
    ///
    /// Layout is `[3, height, width]`, matching candle vision backbones.
    pub fn to_chw(&self, mean: [f32; 3], std: [f32; 3]) -> Vec<f32> {
        let (w, h) = (self.width() as usize, self.height() as usize);
        let plane = w * h;
        let mut data = vec![0f32; 3 * plane];

        for (idx, pixel) in self.pixels.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                data[c * plane + idx] = (value - mean[c]) / std[c];
            }
        }

        data
    }

    /// Per-pixel luma (ITU-R BT.601) in `[0, 255]`, row-major
    pub fn luma(&self) -> Vec<f32> {
        self.pixels
            .pixels()
            .map(|p| 0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32)
            .collect()
    }
}

/// Decodes and normalizes images to a fixed square size
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    target_size: u32,
    filter: FilterType,
}

impl ImagePreprocessor {
    /// Create a preprocessor producing `target_size` x `target_size` RGB images
    pub fn new(target_size: u32) -> Result<Self> {
        if target_size == 0 {
            return Err(Error::config("target image size must be positive"));
        }
        Ok(Self {
            target_size,
            filter: FilterType::Triangle,
        })
    }

    /// Use a different resampling filter
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Decode (if needed), center-crop to square and resize.
    pub fn prepare(&self, input: ImageInput) -> Result<PreparedImage> {
        let decoded = match input {
            ImageInput::Missing => {
                tracing::debug!("No image supplied, using placeholder");
                return Ok(PreparedImage::placeholder(self.target_size));
            }
            ImageInput::Encoded(bytes) => Self::decode(&bytes)?,
            ImageInput::Decoded(image) => image,
        };

        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(Error::invalid_image("image has zero width or height"));
        }

        let resized = decoded.resize_to_fill(self.target_size, self.target_size, self.filter);
        Ok(PreparedImage::from_rgb(resized.to_rgb8()))
    }

    fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(Error::invalid_image("image payload is empty"));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(Error::invalid_image(format!(
                "image payload is {} bytes, limit is {}",
                bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }

        image::load_from_memory(bytes)
            .map_err(|e| Error::invalid_image(format!("failed to decode image: {}", e)))
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            filter: FilterType::Triangle,
        }
    }
}
