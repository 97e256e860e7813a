use crate::error::OverlayError;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use image::{Rgb, RgbImage};
use ndarray::Array2;

/// Bilinear resize of a single-channel f32 heatmap to the target resolution.
pub fn resize_heatmap(
    map: &Array2<f32>,
    width: u32,
    height: u32,
) -> Result<Array2<f32>, OverlayError> {
    let (h, w) = map.dim();
    if (w as u32, h as u32) == (width, height) {
        return Ok(map.clone());
    }

    let flat: Vec<f32> = map.iter().copied().collect();
    let src = Image::from_vec_u8(
        w as u32,
        h as u32,
        bytemuck::cast_slice(&flat).to_vec(),
        PixelType::F32,
    )
    .map_err(|e| OverlayError::Resize(e.to_string()))?;

    let mut dst = Image::new(width, height, PixelType::F32);
    Resizer::new()
        .resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )
        .map_err(|e| OverlayError::Resize(e.to_string()))?;

    let values: Vec<f32> = bytemuck::pod_collect_to_vec(dst.buffer());
    Array2::from_shape_vec((height as usize, width as usize), values)
        .map_err(|e| OverlayError::Resize(e.to_string()))
}

fn jet_channel(v: f32, center: f32) -> u8 {
    let x = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
    (x * 255.0) as u8
}

/// Map a heatmap in [0, 1] through the jet color table. Values outside the
/// unit interval are clamped first.
pub fn colorize(map: &Array2<f32>) -> RgbImage {
    let (h, w) = map.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let v = map[[y as usize, x as usize]].clamp(0.0, 1.0);
        Rgb([
            jet_channel(v, 3.0),
            jet_channel(v, 2.0),
            jet_channel(v, 1.0),
        ])
    })
}
