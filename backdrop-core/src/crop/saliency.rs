use backdrop_model::FocalPoint;

use crate::ports::PixelBuffer;

const SATURATION_WEIGHT: f64 = 0.35;
const CENTER_BIAS: f64 = 0.25;
const MIN_TOTAL_WEIGHT: f64 = 1e-6;

/// Rec. 709 relative luminance in `[0, 1]`.
fn luminance(r: u8, g: u8, b: u8) -> f64 {
    (0.2126 * f64::from(r) + 0.7152 * f64::from(g) + 0.0722 * f64::from(b)) / 255.0
}

/// HSV saturation in `[0, 1]`; black has zero saturation.
fn saturation(r: u8, g: u8, b: u8) -> f64 {
    let max = r.max(g).max(b);
    if max == 0 {
        return 0.0;
    }
    let min = r.min(g).min(b);
    f64::from(max - min) / f64::from(max)
}

/// Weighted centroid of edge energy and color saturation.
///
/// Interior pixels score `|dL/dx| + |dL/dy| + 0.35 * saturation`, damped
/// slightly toward the borders. Images with no measurable saliency (flat
/// fills, buffers too small to have an interior) yield the center.
pub fn focal_point(buffer: &PixelBuffer) -> FocalPoint {
    let (w, h) = (buffer.width as usize, buffer.height as usize);
    if w < 3 || h < 3 {
        return FocalPoint::CENTER;
    }

    let mut lum = Vec::with_capacity(w * h);
    let mut sat = Vec::with_capacity(w * h);
    for px in buffer.rgba.chunks_exact(4) {
        lum.push(luminance(px[0], px[1], px[2]));
        sat.push(saturation(px[0], px[1], px[2]));
    }

    let at = |x: usize, y: usize| y * w + x;
    let (x_span, y_span) = ((w - 1) as f64, (h - 1) as f64);

    let mut total = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for y in 1..h - 1 {
        let ny = y as f64 / y_span;
        let bias_y = 1.0 - CENTER_BIAS * (ny - 0.5).abs();
        for x in 1..w - 1 {
            let nx = x as f64 / x_span;
            let gradient = (lum[at(x + 1, y)] - lum[at(x - 1, y)]).abs()
                + (lum[at(x, y + 1)] - lum[at(x, y - 1)]).abs();
            let bias = (1.0 - CENTER_BIAS * (nx - 0.5).abs()) * bias_y;
            let score = (gradient + SATURATION_WEIGHT * sat[at(x, y)]) * bias;
            if score > 0.0 {
                total += score;
                sum_x += score * nx;
                sum_y += score * ny;
            }
        }
    }

    if total < MIN_TOTAL_WEIGHT {
        return FocalPoint::CENTER;
    }
    FocalPoint::smartcrop(sum_x / total, sum_y / total)
}

#[cfg(test)]
mod tests {
    use super::{focal_point, saturation};
    use crate::ports::PixelBuffer;
    use backdrop_model::FocalSource;

    fn canvas(w: u32, h: u32, paint: impl Fn(u32, u32) -> [u8; 4]) -> PixelBuffer {
        let mut rgba = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                rgba.extend_from_slice(&paint(x, y));
            }
        }
        PixelBuffer::new(w, h, rgba).unwrap()
    }

    #[test]
    fn flat_image_has_no_focal_point() {
        let gray = canvas(32, 18, |_, _| [128, 128, 128, 255]);
        let focal = focal_point(&gray);
        assert_eq!(focal.source, FocalSource::Default);
        assert_eq!((focal.x, focal.y), (0.5, 0.5));
    }

    #[test]
    fn bright_subject_pulls_the_centroid() {
        let img = canvas(48, 27, |x, y| {
            if (34..42).contains(&x) && (4..10).contains(&y) {
                [255, 40, 40, 255]
            } else {
                [10, 10, 10, 255]
            }
        });
        let focal = focal_point(&img);
        assert_eq!(focal.source, FocalSource::Smartcrop);
        assert!(focal.x > 0.65, "x = {}", focal.x);
        assert!(focal.y < 0.4, "y = {}", focal.y);
    }

    #[test]
    fn tiny_buffers_fall_back() {
        let img = canvas(2, 2, |_, _| [255, 0, 0, 255]);
        assert_eq!(focal_point(&img).source, FocalSource::Default);
    }

    #[test]
    fn black_is_unsaturated() {
        assert_eq!(saturation(0, 0, 0), 0.0);
        assert_eq!(saturation(255, 0, 0), 1.0);
    }
}
