use backdrop_model::{CoverPosition, FocalPoint};

/// Aspect ratios closer than this are treated as equal.
const ASPECT_EPSILON: f64 = 1e-3;

/// `background-position` that keeps `focal` visible under a cover fit.
///
/// Only the axis that overflows the viewport can move. Along it the visible
/// window is centered on the focal point and then clamped to the image, and
/// the resulting offset is expressed as a percentage of the travel range.
pub fn cover_position_for(
    image_width: u32,
    image_height: u32,
    viewport_aspect: f64,
    focal: FocalPoint,
) -> CoverPosition {
    if image_width == 0
        || image_height == 0
        || !viewport_aspect.is_finite()
        || viewport_aspect <= 0.0
    {
        return CoverPosition::CENTER;
    }

    let image_aspect = f64::from(image_width) / f64::from(image_height);
    if (image_aspect - viewport_aspect).abs() < ASPECT_EPSILON {
        return CoverPosition::CENTER;
    }

    if image_aspect > viewport_aspect {
        let visible = viewport_aspect / image_aspect;
        CoverPosition::new(axis_percent(focal.x, visible), 50.0)
    } else {
        let visible = image_aspect / viewport_aspect;
        CoverPosition::new(50.0, axis_percent(focal.y, visible))
    }
}

fn axis_percent(focal: f64, visible: f64) -> f64 {
    let travel = 1.0 - visible;
    if travel <= f64::EPSILON {
        return 50.0;
    }
    let start = (focal - visible / 2.0).clamp(0.0, travel);
    start / travel * 100.0
}

#[cfg(test)]
mod tests {
    use super::cover_position_for;
    use backdrop_model::{CoverPosition, FocalPoint};

    const WIDESCREEN: f64 = 16.0 / 9.0;

    #[test]
    fn matching_aspect_stays_centered() {
        let pos = cover_position_for(1920, 1080, WIDESCREEN, FocalPoint::smartcrop(0.9, 0.1));
        assert_eq!(pos, CoverPosition::CENTER);
        assert_eq!(pos.x_css(), "50.00%");
        assert_eq!(pos.y_css(), "50.00%");
    }

    #[test]
    fn wide_image_moves_only_horizontally() {
        for fy in [0.0, 0.3, 1.0] {
            let centered = cover_position_for(4000, 2000, WIDESCREEN, FocalPoint::smartcrop(0.5, fy));
            assert_eq!(centered.x_css(), "50.00%");
            assert_eq!(centered.y_css(), "50.00%");

            let right = cover_position_for(4000, 2000, WIDESCREEN, FocalPoint::smartcrop(0.55, fy));
            assert_eq!(right.x_css(), "95.00%");
            assert_eq!(right.y_css(), "50.00%");

            let far_left = cover_position_for(4000, 2000, WIDESCREEN, FocalPoint::smartcrop(0.0, fy));
            assert_eq!(far_left.x_css(), "0.00%");
        }
    }

    #[test]
    fn tall_image_moves_only_vertically() {
        let pos = cover_position_for(1000, 2000, WIDESCREEN, FocalPoint::smartcrop(0.9, 1.0));
        assert_eq!(pos.x_css(), "50.00%");
        assert_eq!(pos.y_css(), "100.00%");
    }

    #[test]
    fn degenerate_inputs_fall_back_to_center() {
        assert_eq!(cover_position_for(0, 10, 1.0, FocalPoint::CENTER), CoverPosition::CENTER);
        assert_eq!(
            cover_position_for(10, 10, f64::NAN, FocalPoint::smartcrop(1.0, 1.0)),
            CoverPosition::CENTER
        );
    }
}
