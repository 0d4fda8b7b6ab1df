use std::fmt;

/// Where a focal point came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FocalSource {
    #[default]
    Default,
    Smartcrop,
}

/// Normalized coordinate of the visually important region, `x, y ∈ [0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FocalPoint {
    pub x: f64,
    pub y: f64,
    pub source: FocalSource,
}

impl FocalPoint {
    pub const CENTER: Self = Self {
        x: 0.5,
        y: 0.5,
        source: FocalSource::Default,
    };

    pub fn smartcrop(x: f64, y: f64) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
            source: FocalSource::Smartcrop,
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == FocalSource::Default
    }
}

impl Default for FocalPoint {
    fn default() -> Self {
        Self::CENTER
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.5 }
}

/// CSS `background-position` for a `background-size: cover` layer.
///
/// Values are percentages in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(into = "CssPosition", try_from = "CssPosition")
)]
pub struct CoverPosition {
    pub x_percent: f64,
    pub y_percent: f64,
}

impl CoverPosition {
    pub const CENTER: Self = Self {
        x_percent: 50.0,
        y_percent: 50.0,
    };

    pub fn new(x_percent: f64, y_percent: f64) -> Self {
        Self {
            x_percent: x_percent.clamp(0.0, 100.0),
            y_percent: y_percent.clamp(0.0, 100.0),
        }
    }

    pub fn x_css(&self) -> String {
        format!("{:.2}%", self.x_percent)
    }

    pub fn y_css(&self) -> String {
        format!("{:.2}%", self.y_percent)
    }

    pub const fn size_css(&self) -> &'static str {
        "cover"
    }
}

impl Default for CoverPosition {
    fn default() -> Self {
        Self::CENTER
    }
}

impl fmt::Display for CoverPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}% {:.2}%", self.x_percent, self.y_percent)
    }
}

/// Wire shape of [`CoverPosition`]: `{x: "50.00%", y: "50.00%", size: "cover"}`.
#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct CssPosition {
    x: String,
    y: String,
    size: String,
}

#[cfg(feature = "serde")]
impl From<CoverPosition> for CssPosition {
    fn from(value: CoverPosition) -> Self {
        Self {
            x: value.x_css(),
            y: value.y_css(),
            size: value.size_css().to_string(),
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<CssPosition> for CoverPosition {
    type Error = String;

    fn try_from(value: CssPosition) -> Result<Self, Self::Error> {
        fn parse(raw: &str) -> Result<f64, String> {
            raw.trim()
                .trim_end_matches('%')
                .parse::<f64>()
                .map_err(|e| format!("invalid position component {raw:?}: {e}"))
        }
        Ok(CoverPosition::new(parse(&value.x)?, parse(&value.y)?))
    }
}

/// Bucket a viewport aspect ratio to two decimals for memo keys.
///
/// Non-finite or non-positive ratios collapse into bucket 0.
pub fn aspect_bucket(aspect: f64) -> u32 {
    if !aspect.is_finite() || aspect <= 0.0 {
        return 0;
    }
    (aspect * 100.0).round().min(f64::from(u32::MAX)) as u32
}

/// Output of smart-crop analysis for one image/viewport pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CropResult {
    pub focal_point: FocalPoint,
    pub position: CoverPosition,
    pub width: u32,
    pub height: u32,
}

impl CropResult {
    /// Deterministic result used whenever analysis cannot run.
    pub const FALLBACK: Self = Self {
        focal_point: FocalPoint::CENTER,
        position: CoverPosition::CENTER,
        width: 0,
        height: 0,
    };

    pub fn is_fallback(&self) -> bool {
        self.focal_point.is_default()
    }
}
