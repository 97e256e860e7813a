use crate::error::ModelError;
use common::span;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use image::RgbImage;
use ndarray::Array3;
use serde::Deserialize;

/// Per-model input normalization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    /// Fixed rescale to [-1, 1] (EfficientNet-style, used by the MRI model).
    Rescale,
    /// Per-image standardization `(x - mean) / (std + 1e-12)` (chest model).
    Standardize,
}

/// Decode an uploaded image into RGB. Empty or undecodable payloads are
/// request-level input errors, rejected before any tensor work.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ModelError> {
    if bytes.is_empty() {
        return Err(ModelError::EmptyImage);
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| ModelError::InvalidImage(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Bilinear resize to the model's fixed input resolution.
pub fn resize_rgb(img: &RgbImage, width: u32, height: u32) -> Result<RgbImage, ModelError> {
    if img.dimensions() == (width, height) {
        return Ok(img.clone());
    }

    let mut src_buf = img.as_raw().clone();
    let src = Image::from_slice_u8(img.width(), img.height(), &mut src_buf, PixelType::U8x3)
        .map_err(|e| ModelError::Resize(e.to_string()))?;

    let mut dst = Image::new(width, height, PixelType::U8x3);
    Resizer::new()
        .resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )
        .map_err(|e| ModelError::Resize(e.to_string()))?;

    RgbImage::from_raw(width, height, dst.into_vec())
        .ok_or_else(|| ModelError::Resize("resized buffer has unexpected size".into()))
}

/// Convert an RGB image into a normalized H x W x C tensor.
pub fn to_tensor(img: &RgbImage, mode: Preprocessing) -> Array3<f32> {
    let (w, h) = img.dimensions();
    let mut t = Array3::<f32>::zeros((h as usize, w as usize, 3));
    for (x, y, p) in img.enumerate_pixels() {
        for c in 0..3 {
            t[[y as usize, x as usize, c]] = p.0[c] as f32;
        }
    }
    match mode {
        Preprocessing::Rescale => t.mapv_into(|v| v / 127.5 - 1.0),
        Preprocessing::Standardize => {
            let mean = t.mean().unwrap_or(0.0);
            let std = t.std(0.0);
            t.mapv_into(|v| (v - mean) / (std + 1e-12))
        }
    }
}

/// Decode, resize and normalize an upload. Returns the normalized tensor and
/// the resized raw image (kept for the heatmap overlay).
pub fn prepare(
    bytes: &[u8],
    width: u32,
    height: u32,
    mode: Preprocessing,
) -> Result<(Array3<f32>, RgbImage), ModelError> {
    let _s = span!("preprocess_image");
    let decoded = decode_rgb(bytes)?;
    let resized = resize_rgb(&decoded, width, height)?;
    let tensor = to_tensor(&resized, mode);
    Ok((tensor, resized))
}
