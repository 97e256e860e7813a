use ndarray::{Array2, Array3};

/// Rotate a heatmap 90 degrees counterclockwise, `k` times.
pub fn rot90(map: &Array2<f32>, k: usize) -> Array2<f32> {
    match k % 4 {
        0 => map.clone(),
        1 => {
            let (h, w) = map.dim();
            Array2::from_shape_fn((w, h), |(i, j)| map[[j, w - 1 - i]])
        }
        n => rot90(&rot90(map, 1), n - 1),
    }
}

/// Rotate an H x W x C image tensor 90 degrees counterclockwise in the
/// spatial plane, `k` times.
pub fn rot90_hwc(img: &Array3<f32>, k: usize) -> Array3<f32> {
    match k % 4 {
        0 => img.clone(),
        1 => {
            let (h, w, c) = img.dim();
            Array3::from_shape_fn((w, h, c), |(i, j, ch)| img[[j, w - 1 - i, ch]])
        }
        n => rot90_hwc(&rot90_hwc(img, 1), n - 1),
    }
}

/// Mirror a heatmap left-to-right.
pub fn fliplr(map: &Array2<f32>) -> Array2<f32> {
    let (h, w) = map.dim();
    Array2::from_shape_fn((h, w), |(i, j)| map[[i, w - 1 - j]])
}

/// Mirror an H x W x C image tensor left-to-right.
pub fn fliplr_hwc(img: &Array3<f32>) -> Array3<f32> {
    let (h, w, c) = img.dim();
    Array3::from_shape_fn((h, w, c), |(i, j, ch)| img[[i, w - 1 - j, ch]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_rot90_counterclockwise() {
        let m = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]);
        // Counterclockwise: the rightmost column becomes the top row.
        let r = rot90(&m, 1);
        assert_eq!(r, arr2(&[[2.0, 4.0], [1.0, 3.0]]));
    }

    #[test]
    fn test_rot90_four_times_is_identity() {
        let m = Array2::from_shape_fn((3, 5), |(i, j)| (i * 5 + j) as f32);
        assert_eq!(rot90(&m, 4), m);
    }

    #[test]
    fn test_rot90_inverse_pairs() {
        let m = Array2::from_shape_fn((4, 6), |(i, j)| (i * 7 + j * 3) as f32);
        for k in 0..4 {
            assert_eq!(rot90(&rot90(&m, k), 4 - k), m, "k = {}", k);
        }
    }

    #[test]
    fn test_rot90_hwc_rotates_channels_together() {
        let img = Array3::from_shape_fn((2, 3, 2), |(i, j, c)| (i * 3 + j) as f32 + c as f32 * 100.0);
        let r = rot90_hwc(&img, 1);
        assert_eq!(r.dim(), (3, 2, 2));
        for c in 0..2 {
            assert_eq!(r[[0, 0, c]], img[[0, 2, c]]);
            assert_eq!(r[[2, 1, c]], img[[1, 0, c]]);
        }
    }

    #[test]
    fn test_fliplr_is_involution() {
        let m = Array2::from_shape_fn((3, 4), |(i, j)| (i * 4 + j) as f32);
        assert_eq!(fliplr(&fliplr(&m)), m);
        assert_eq!(fliplr(&m)[[0, 0]], m[[0, 3]]);
    }

    #[test]
    fn test_fliplr_hwc_mirrors_columns() {
        let img = Array3::from_shape_fn((2, 3, 3), |(i, j, c)| (i * 9 + j * 3 + c) as f32);
        let f = fliplr_hwc(&img);
        assert_eq!(f[[1, 0, 2]], img[[1, 2, 2]]);
        assert_eq!(f[[0, 1, 0]], img[[0, 1, 0]]);
    }
}
