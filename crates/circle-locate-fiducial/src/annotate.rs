//! Debug overlay for a located fiducial.

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut,
    draw_line_segment_mut,
};
use imageproc::rect::Rect;

use crate::offset::image_center;
use crate::types::{LocateOutcome, SearchSpec};

pub const CENTER_COLOR: Rgb<u8> = Rgb([0, 160, 255]);
pub const APPROX_COLOR: Rgb<u8> = Rgb([255, 200, 0]);
pub const WINDOW_COLOR: Rgb<u8> = Rgb([0, 220, 0]);
pub const CIRCLE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Copy of `image` with the image-center crosshair, the search window and
/// approximate center, and the selected circle (when found) drawn on top.
pub fn annotate(image: &DynamicImage, search: &SearchSpec, outcome: &LocateOutcome) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return canvas;
    }

    let [icx, icy] = image_center(w, h);
    draw_line_segment_mut(
        &mut canvas,
        (icx as f32, 0.0),
        (icx as f32, (h - 1) as f32),
        CENTER_COLOR,
    );
    draw_line_segment_mut(
        &mut canvas,
        (0.0, icy as f32),
        ((w - 1) as f32, icy as f32),
        CENTER_COLOR,
    );

    let (cw, ch) = (i64::from(w), i64::from(h));
    let [ax, ay] = search.approx_center.map(i64::from);
    let side = i64::from(search.window_size.max(1));
    let half = side / 2;
    // Edges that fall off the canvas are parked one pixel outside it.
    let x0 = (ax - half).clamp(-1, cw);
    let y0 = (ay - half).clamp(-1, ch);
    let x1 = (ax - half + side - 1).clamp(-1, cw);
    let y1 = (ay - half + side - 1).clamp(-1, ch);
    draw_hollow_rect_mut(
        &mut canvas,
        Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32),
        WINDOW_COLOR,
    );
    draw_cross_mut(
        &mut canvas,
        APPROX_COLOR,
        ax.clamp(-2, cw + 1) as i32,
        ay.clamp(-2, ch + 1) as i32,
    );

    if let LocateOutcome::Found(r) = outcome {
        let [cx, cy] = r.center.map(i64::from);
        let radius = i64::from(r.radius);
        let visible = radius <= cw + ch
            && cx + radius + 1 >= 0
            && cy + radius + 1 >= 0
            && cx - radius - 1 < cw
            && cy - radius - 1 < ch;
        if visible {
            let center = (r.center[0], r.center[1]);
            for dr in -1..=1 {
                let radius = r.radius + dr;
                if radius > 0 {
                    draw_hollow_circle_mut(&mut canvas, center, radius, CIRCLE_COLOR);
                }
            }
            draw_filled_circle_mut(&mut canvas, center, 3, CIRCLE_COLOR);
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectionResult, NotFoundReason};
    use image::GrayImage;

    fn gray(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::new(w, h))
    }

    #[test]
    fn draws_circle_and_window() {
        let outcome = LocateOutcome::Found(DetectionResult {
            center: [60, 40],
            radius: 10,
            offset_mm: [0.0, 0.0],
        });
        let out = annotate(&gray(120, 80), &SearchSpec::new([58, 42], 30), &outcome);
        assert_eq!(out.dimensions(), (120, 80));
        assert_eq!(out.get_pixel(60, 40), &CIRCLE_COLOR);
        assert_eq!(out.get_pixel(70, 40), &CIRCLE_COLOR);
        // Top-left corner of the window square.
        assert_eq!(out.get_pixel(43, 27), &WINDOW_COLOR);
        assert_eq!(out.get_pixel(0, 40), &CENTER_COLOR);
    }

    #[test]
    fn not_found_draws_no_circle() {
        let outcome = LocateOutcome::NotFound {
            reason: NotFoundReason::OutsideWindow,
            raw_candidates: 1,
        };
        let out = annotate(&gray(120, 80), &SearchSpec::new([20, 20], 10), &outcome);
        assert!(out.pixels().all(|p| *p != CIRCLE_COLOR));
        assert_eq!(out.get_pixel(20, 20), &APPROX_COLOR);
    }

    #[test]
    fn off_image_search_is_clipped() {
        let outcome = LocateOutcome::NotFound {
            reason: NotFoundReason::NoCandidates,
            raw_candidates: 0,
        };
        let out = annotate(&gray(50, 50), &SearchSpec::new([-400, 900], 250), &outcome);
        assert_eq!(out.dimensions(), (50, 50));
    }

    #[test]
    fn extreme_search_coordinates_do_not_overflow() {
        let outcome = LocateOutcome::NotFound {
            reason: NotFoundReason::OutsideWindow,
            raw_candidates: 3,
        };
        for (center, window) in [
            ([i32::MAX, i32::MAX], u32::MAX),
            ([i32::MIN, i32::MIN], u32::MAX),
            ([i32::MAX, i32::MIN], 7),
            ([25, 25], u32::MAX),
        ] {
            let out = annotate(&gray(50, 50), &SearchSpec::new(center, window), &outcome);
            assert_eq!(out.dimensions(), (50, 50));
        }

        let far = LocateOutcome::Found(DetectionResult {
            center: [i32::MAX - 2, 10],
            radius: i32::MAX,
            offset_mm: [0.0, 0.0],
        });
        let out = annotate(&gray(50, 50), &SearchSpec::new([i32::MAX, 10], 9), &far);
        assert!(out.pixels().all(|p| *p != CIRCLE_COLOR));
    }

    #[test]
    fn window_partly_off_canvas_keeps_visible_edges() {
        let outcome = LocateOutcome::NotFound {
            reason: NotFoundReason::NoCandidates,
            raw_candidates: 0,
        };
        // Window spans x in [-10, 19]: left edge off canvas, right edge at 19.
        let out = annotate(&gray(50, 50), &SearchSpec::new([5, 25], 30), &outcome);
        assert_eq!(out.get_pixel(19, 30), &WINDOW_COLOR);
        assert_eq!(out.get_pixel(0, 30), &Rgb([0, 0, 0]));
    }
}
