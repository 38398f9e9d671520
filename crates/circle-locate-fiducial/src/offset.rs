//! Pixel-to-millimetre conversion relative to the image center.

/// Geometric image center with integer division: `(w / 2, h / 2)`.
pub fn image_center(width: u32, height: u32) -> [i32; 2] {
    [(width / 2) as i32, (height / 2) as i32]
}

/// Offset of `point` from `center` in millimetres.
///
/// The vertical axis is flipped so that positive `dy` points up, the way a
/// motion stage expects it.
pub fn offset_mm(point: [i32; 2], center: [i32; 2], mm_per_pixel: f64) -> [f64; 2] {
    let dx = (point[0] - center[0]) as f64;
    let dy = (point[1] - center[1]) as f64;
    [dx * mm_per_pixel, -dy * mm_per_pixel]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn center_truncates_odd_sizes() {
        assert_eq!(image_center(2000, 1500), [1000, 750]);
        assert_eq!(image_center(1921, 1081), [960, 540]);
    }

    #[test]
    fn right_and_above_is_positive_on_both_axes() {
        let [dx, dy] = offset_mm([1100, 700], [1000, 750], 0.1);
        assert_relative_eq!(dx, 10.0, epsilon = 1e-12);
        assert_relative_eq!(dy, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn left_and_below_is_negative_on_both_axes() {
        let [dx, dy] = offset_mm([990, 760], [1000, 750], 0.117);
        assert!(dx < 0.0 && dy < 0.0);
        assert_relative_eq!(dy, -1.17, epsilon = 1e-12);
    }

    #[test]
    fn center_maps_to_zero() {
        assert_eq!(offset_mm([1000, 750], [1000, 750], 0.117), [0.0, -0.0]);
    }
}
