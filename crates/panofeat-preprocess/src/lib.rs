//! panofeat-preprocess – resize + normalize + pack panorama views.
//!
//! Raw simulator views arrive as [`image::RgbImage`]. The [`ImageLoader`]
//! scales each one so its short side hits `min_size` (long side capped at
//! `max_size`), normalizes to 0‑1.0f32 CHW and packs the whole panorama into
//! a single zero-padded `N×3×H×W` tensor for the detector.

use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use log::debug;
use ndarray::{s, Array3, Array4};
use resize::{Pixel, Type};
use rgb::FromSlice;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed batches are padded so H and W are multiples of this.
pub const SIZE_DIVISIBLE: usize = 32;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Image {index} is empty ({width}x{height})")]
    EmptyImage { index: usize, width: u32, height: u32 },
    #[error("Cannot pack an empty batch")]
    EmptyBatch,
    #[error("Resize failed: {0}")]
    Resize(String),
    #[error("Unknown device `{0}` (expected `cpu`, `cuda` or `cuda:N`)")]
    InvalidDevice(String),
}

pub type Result<T> = std::result::Result<T, PreprocessError>;

/// Compute device a tensor is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

impl FromStr for Device {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| PreprocessError::InvalidDevice(s.clone())),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = PreprocessError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Device> for String {
    fn from(d: Device) -> Self {
        d.to_string()
    }
}

/// A packed, detector-ready panorama.
#[derive(Debug, Clone)]
pub struct ImageBatch {
    /// `N×3×H×W`, values in 0‑1, zero padded bottom/right.
    pub tensor: Array4<f32>,
    /// Original `(height, width)` of every image, in batch order.
    pub image_sizes: Vec<(u32, u32)>,
    /// `(height, width)` after resizing, before padding.
    pub resized_sizes: Vec<(u32, u32)>,
    pub device: Device,
}

impl ImageBatch {
    pub fn len(&self) -> usize {
        self.image_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_sizes.is_empty()
    }

    /// Tag the batch for `device`. Host memory stays where it is; the
    /// detector backend performs the actual upload.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ImageLoader {
    min_size: u32,
    max_size: u32,
}

impl ImageLoader {
    /// Create a loader; `min_size == max_size` gives a fixed square frame size.
    pub fn new(min_size: u32, max_size: u32) -> Self {
        Self { min_size, max_size: max_size.max(min_size) }
    }

    pub fn with_frame_size(frame_size: u32) -> Self {
        Self::new(frame_size, frame_size)
    }

    /// `(width, height)` an image of the given size is scaled to.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let short = width.min(height) as f32;
        let long = width.max(height) as f32;
        let mut scale = self.min_size as f32 / short;
        if long * scale > self.max_size as f32 {
            scale = self.max_size as f32 / long;
        }
        (
            ((width as f32 * scale).round() as u32).max(1),
            ((height as f32 * scale).round() as u32).max(1),
        )
    }

    /// Resize and normalize one image into a `3×H×W` array.
    pub fn prepare(&self, index: usize, image: &RgbImage) -> Result<Array3<f32>> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(PreprocessError::EmptyImage { index, width: w, height: h });
        }
        let (dst_w, dst_h) = self.target_size(w, h);

        let pixels = if (dst_w, dst_h) == (w, h) {
            image.as_raw().clone()
        } else {
            let mut dst = vec![0u8; (dst_w * dst_h * 3) as usize];
            // bilinear, the same filter the detector was trained behind
            let mut resizer = resize::new(
                w as usize,
                h as usize,
                dst_w as usize,
                dst_h as usize,
                Pixel::RGB8,
                Type::Triangle,
            )
            .map_err(|e| PreprocessError::Resize(format!("{e:?}")))?;
            resizer
                .resize(image.as_raw().as_rgb(), dst.as_rgb_mut())
                .map_err(|e| PreprocessError::Resize(format!("{e:?}")))?;
            dst
        };

        let dst_w = dst_w as usize;
        let mut arr = Array3::<f32>::zeros((3, dst_h as usize, dst_w));
        for (idx, px) in pixels.chunks_exact(3).enumerate() {
            let (y, x) = (idx / dst_w, idx % dst_w);
            for c in 0..3 {
                arr[(c, y, x)] = px[c] as f32 / 255.0;
            }
        }
        Ok(arr)
    }

    /// Prepare every image and pack them into one padded batch on the CPU.
    pub fn load(&self, images: &[RgbImage]) -> Result<ImageBatch> {
        if images.is_empty() {
            return Err(PreprocessError::EmptyBatch);
        }

        let prepared = images
            .iter()
            .enumerate()
            .map(|(i, img)| self.prepare(i, img))
            .collect::<Result<Vec<_>>>()?;

        let max_h = prepared.iter().map(|a| a.shape()[1]).max().unwrap_or(0);
        let max_w = prepared.iter().map(|a| a.shape()[2]).max().unwrap_or(0);
        let pad_h = max_h.div_ceil(SIZE_DIVISIBLE) * SIZE_DIVISIBLE;
        let pad_w = max_w.div_ceil(SIZE_DIVISIBLE) * SIZE_DIVISIBLE;

        let mut tensor = Array4::<f32>::zeros((prepared.len(), 3, pad_h, pad_w));
        let mut resized_sizes = Vec::with_capacity(prepared.len());
        for (i, arr) in prepared.iter().enumerate() {
            let (h, w) = (arr.shape()[1], arr.shape()[2]);
            tensor.slice_mut(s![i, .., ..h, ..w]).assign(arr);
            resized_sizes.push((h as u32, w as u32));
        }
        debug!("packed {} images into {:?}", prepared.len(), tensor.shape());

        Ok(ImageBatch {
            tensor,
            image_sizes: images.iter().map(|i| (i.height(), i.width())).collect(),
            resized_sizes,
            device: Device::Cpu,
        })
    }
}
