use image::{DynamicImage, GrayImage};
use imageproc::filter::gaussian_blur_f32;

/// Smoothing applied before circle detection. Fixed for reproducible results.
pub const BLUR_SIGMA: f32 = 1.2;

/// Single-channel, Gaussian-smoothed copy of `image` for the circle detector.
pub fn prepare_gray(image: &DynamicImage) -> GrayImage {
    smooth(&image.to_luma8())
}

pub fn smooth(gray: &GrayImage) -> GrayImage {
    gaussian_blur_f32(gray, BLUR_SIGMA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn keeps_size_and_flattens_color() {
        let rgb = RgbImage::from_pixel(31, 17, Rgb([200, 200, 200]));
        let gray = prepare_gray(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(gray.dimensions(), (31, 17));
        let v = gray.get_pixel(15, 8)[0];
        assert!((199..=200).contains(&v), "v {v}");
    }

    #[test]
    fn softens_a_step_edge() {
        let step = GrayImage::from_fn(20, 5, |x, _| Luma([if x < 10 { 0 } else { 255 }]));
        let out = smooth(&step);
        let left = out.get_pixel(9, 2)[0];
        let right = out.get_pixel(10, 2)[0];
        assert!(left > 0 && left < 128, "left {left}");
        assert!(right > 128 && right < 255, "right {right}");
    }
}
