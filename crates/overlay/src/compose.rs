use crate::error::OverlayError;
use crate::heatmap::{colorize, resize_heatmap};
use image::{Rgb, RgbImage};
use ndarray::Array2;

/// Alpha-blend a rendered heatmap over the base image.
pub fn blend(base: &RgbImage, heat: &RgbImage, alpha: f32) -> Result<RgbImage, OverlayError> {
    if base.dimensions() != heat.dimensions() {
        return Err(OverlayError::SizeMismatch(format!(
            "base is {:?}, heatmap is {:?}",
            base.dimensions(),
            heat.dimensions()
        )));
    }
    let a = alpha.clamp(0.0, 1.0);
    Ok(RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let b = base.get_pixel(x, y).0;
        let h = heat.get_pixel(x, y).0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (b[c] as f32 * (1.0 - a) + h[c] as f32 * a).round() as u8;
        }
        Rgb(out)
    }))
}

/// Resize the heatmap to the base image, colorize it and blend.
pub fn overlay(
    base: &RgbImage,
    heatmap: &Array2<f32>,
    alpha: f32,
) -> Result<RgbImage, OverlayError> {
    let resized = resize_heatmap(heatmap, base.width(), base.height())?;
    blend(base, &colorize(&resized), alpha)
}

/// Concatenate images left to right. All images must share a height.
pub fn hstack(images: &[RgbImage]) -> Result<RgbImage, OverlayError> {
    let Some(first) = images.first() else {
        return Err(OverlayError::SizeMismatch("no images to stack".into()));
    };
    let height = first.height();
    if images.iter().any(|i| i.height() != height) {
        return Err(OverlayError::SizeMismatch(
            "stacked images must share a height".into(),
        ));
    }
    let width: u32 = images.iter().map(|i| i.width()).sum();
    let mut out = RgbImage::new(width, height);
    let mut offset = 0u32;
    for img in images {
        for (x, y, p) in img.enumerate_pixels() {
            out.put_pixel(offset + x, y, *p);
        }
        offset += img.width();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(rgb))
    }

    #[test]
    fn test_blend_mixes_pixels() {
        let base = solid(2, 2, [100, 0, 0]);
        let heat = solid(2, 2, [0, 200, 0]);
        let out = blend(&base, &heat, 0.5).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [50, 100, 0]);
    }

    #[test]
    fn test_blend_alpha_zero_keeps_base() {
        let base = solid(3, 3, [10, 20, 30]);
        let heat = solid(3, 3, [255, 255, 255]);
        assert_eq!(blend(&base, &heat, 0.0).unwrap(), base);
    }

    #[test]
    fn test_blend_rejects_size_mismatch() {
        let base = solid(2, 2, [0, 0, 0]);
        let heat = solid(3, 3, [0, 0, 0]);
        assert!(matches!(
            blend(&base, &heat, 0.5),
            Err(OverlayError::SizeMismatch(_))
        ));
    }

    #[test]
    fn test_overlay_resizes_to_base() {
        let base = solid(32, 32, [50, 50, 50]);
        let map = Array2::from_elem((4, 4), 1.0f32);
        let out = overlay(&base, &map, 0.4).unwrap();
        assert_eq!(out.dimensions(), (32, 32));
    }

    #[test]
    fn test_hstack_concatenates_widths() {
        let a = solid(2, 3, [1, 1, 1]);
        let b = solid(4, 3, [2, 2, 2]);
        let out = hstack(&[a, b]).unwrap();
        assert_eq!(out.dimensions(), (6, 3));
        assert_eq!(out.get_pixel(1, 0).0, [1, 1, 1]);
        assert_eq!(out.get_pixel(2, 0).0, [2, 2, 2]);
    }

    #[test]
    fn test_hstack_rejects_mixed_heights() {
        let a = solid(2, 3, [0, 0, 0]);
        let b = solid(2, 4, [0, 0, 0]);
        assert!(matches!(
            hstack(&[a, b]),
            Err(OverlayError::SizeMismatch(_))
        ));
    }
}
