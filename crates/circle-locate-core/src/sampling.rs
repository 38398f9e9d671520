use image::{ImageBuffer, Pixel};

/// Largest channel count among the 8-bit pixel types we remap (RGBA).
const MAX_CHANNELS: usize = 4;

#[inline]
fn texel<P: Pixel<Subpixel = u8>>(src: &ImageBuffer<P, Vec<u8>>, x: i64, y: i64, c: usize) -> f32 {
    if x < 0 || y < 0 || x >= src.width() as i64 || y >= src.height() as i64 {
        return 0.0;
    }
    let channels = P::CHANNEL_COUNT as usize;
    let idx = (y as usize * src.width() as usize + x as usize) * channels + c;
    src.as_raw()[idx] as f32
}

/// Bilinear sample of every channel at `(x, y)`; pixel `i` sits at integer coordinate `i`.
///
/// Samples outside the image blend towards zero (constant black border).
#[inline]
pub fn sample_bilinear<P: Pixel<Subpixel = u8>>(src: &ImageBuffer<P, Vec<u8>>, x: f32, y: f32) -> P {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let channels = (P::CHANNEL_COUNT as usize).min(MAX_CHANNELS);
    let mut buf = [0u8; MAX_CHANNELS];
    for (c, out) in buf.iter_mut().enumerate().take(channels) {
        let p00 = texel(src, x0, y0, c);
        let p10 = texel(src, x0 + 1, y0, c);
        let p01 = texel(src, x0, y0 + 1, c);
        let p11 = texel(src, x0 + 1, y0 + 1, c);

        let a = p00 + fx * (p10 - p00);
        let b = p01 + fx * (p11 - p01);
        *out = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
    }
    *P::from_slice(&buf[..channels])
}
