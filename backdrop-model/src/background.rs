use std::fmt;

use crate::crop::{CoverPosition, CropResult, FocalPoint, aspect_bucket};

/// Where backgrounds are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SourceKind {
    /// User-provided local files.
    Files,
    /// Remote provider (Unsplash, Bing, ...).
    #[default]
    Remote,
    /// Solid color, no image at all.
    Color,
}

impl SourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SourceKind::Files => "files",
            SourceKind::Remote => "remote",
            SourceKind::Color => "color",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackgroundUrls {
    pub full: String,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub small: Option<String>,
}

impl BackgroundUrls {
    pub fn new(full: impl Into<String>) -> Self {
        Self {
            full: full.into(),
            small: None,
        }
    }

    pub fn with_small(mut self, small: impl Into<String>) -> Self {
        self.small = Some(small.into());
        self
    }

    /// Low-resolution URL, only when it differs from the full one.
    pub fn distinct_small(&self) -> Option<&str> {
        self.small
            .as_deref()
            .filter(|s| !s.is_empty() && *s != self.full)
    }
}

/// Records which URL and viewport aspect a stored position was computed for.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CropMeta {
    pub url: String,
    pub viewport_aspect: f64,
}

impl CropMeta {
    pub fn matches(&self, url: &str, viewport_aspect: f64) -> bool {
        self.url == url
            && aspect_bucket(self.viewport_aspect) == aspect_bucket(viewport_aspect)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ImageBackground {
    pub id: String,
    pub urls: BackgroundUrls,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub color: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub position: Option<CoverPosition>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub focal_point: Option<FocalPoint>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub crop_meta: Option<CropMeta>,
}

impl ImageBackground {
    pub fn new(id: impl Into<String>, urls: BackgroundUrls) -> Self {
        Self {
            id: id.into(),
            urls,
            color: None,
            position: None,
            focal_point: None,
            crop_meta: None,
        }
    }

    /// Stored crop if it was computed for this URL and viewport aspect.
    pub fn reusable_crop(&self, viewport_aspect: f64) -> Option<CoverPosition> {
        let meta = self.crop_meta.as_ref()?;
        if meta.matches(&self.urls.full, viewport_aspect) {
            self.position
        } else {
            None
        }
    }

    /// Store `crop` for display. Only an analyzed crop is marked reusable;
    /// a fallback leaves `crop_meta` empty so the next run analyzes again.
    pub fn apply_crop(&mut self, crop: &CropResult, viewport_aspect: f64) {
        self.position = Some(crop.position);
        self.focal_point = Some(crop.focal_point);
        self.crop_meta = (!crop.is_fallback()).then(|| CropMeta {
            url: self.urls.full.clone(),
            viewport_aspect,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColorBackground {
    pub id: String,
    pub color: String,
}

/// The unit rendered on screen.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "format", rename_all = "lowercase")
)]
pub enum BackgroundDescriptor {
    Files(ImageBackground),
    Remote(ImageBackground),
    Color(ColorBackground),
}

impl BackgroundDescriptor {
    pub fn color(id: impl Into<String>, color: impl Into<String>) -> Self {
        Self::Color(ColorBackground {
            id: id.into(),
            color: color.into(),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Files(img) | Self::Remote(img) => &img.id,
            Self::Color(c) => &c.id,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match self {
            Self::Files(_) => SourceKind::Files,
            Self::Remote(_) => SourceKind::Remote,
            Self::Color(_) => SourceKind::Color,
        }
    }

    pub fn image(&self) -> Option<&ImageBackground> {
        match self {
            Self::Files(img) | Self::Remote(img) => Some(img),
            Self::Color(_) => None,
        }
    }

    pub fn image_mut(&mut self) -> Option<&mut ImageBackground> {
        match self {
            Self::Files(img) | Self::Remote(img) => Some(img),
            Self::Color(_) => None,
        }
    }

    pub fn urls(&self) -> Option<&BackgroundUrls> {
        self.image().map(|img| &img.urls)
    }

    pub fn position(&self) -> Option<CoverPosition> {
        self.image().and_then(|img| img.position)
    }
}

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SystemState {
    #[default]
    Idle,
    Loading,
    Applied,
    Error,
}

impl SystemState {
    pub fn can_transition_to(self, next: SystemState) -> bool {
        use SystemState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Idle, Error)
                | (Loading, Applied)
                | (Loading, Error)
                | (Applied, Loading)
                | (Applied, Error)
                | (Error, Loading)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SystemState::Idle => "idle",
            SystemState::Loading => "loading",
            SystemState::Applied => "applied",
            SystemState::Error => "error",
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted "current background" record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CurrentBackgroundRecord {
    pub descriptor: BackgroundDescriptor,
    pub applied_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use SystemState::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Idle.can_transition_to(Error));
        assert!(!Idle.can_transition_to(Applied));
        assert!(Loading.can_transition_to(Applied));
        assert!(!Loading.can_transition_to(Idle));
        assert!(Applied.can_transition_to(Loading));
        assert!(Error.can_transition_to(Loading));
        assert!(!Error.can_transition_to(Applied));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn crop_is_reused_only_for_matching_url_and_aspect() {
        let mut img = ImageBackground::new(
            "a",
            BackgroundUrls::new("https://img/full.jpg"),
        );
        let analyzed = CropResult {
            focal_point: FocalPoint::smartcrop(0.8, 0.5),
            position: CoverPosition::new(80.0, 50.0),
            width: 4000,
            height: 2000,
        };
        img.apply_crop(&analyzed, 16.0 / 9.0);

        assert!(img.reusable_crop(1.7778).is_some());
        assert!(img.reusable_crop(4.0 / 3.0).is_none());

        img.urls.full = "https://img/other.jpg".into();
        assert!(img.reusable_crop(16.0 / 9.0).is_none());
    }

    #[test]
    fn fallback_crop_is_shown_but_not_reused() {
        let mut img = ImageBackground::new("a", BackgroundUrls::new("https://img/full.jpg"));
        img.apply_crop(&CropResult::FALLBACK, 16.0 / 9.0);

        assert_eq!(img.position, Some(CoverPosition::CENTER));
        assert!(img.crop_meta.is_none());
        assert!(img.reusable_crop(16.0 / 9.0).is_none());
    }

    #[test]
    fn distinct_small_ignores_duplicates() {
        let urls = BackgroundUrls::new("a").with_small("a");
        assert_eq!(urls.distinct_small(), None);
        let urls = BackgroundUrls::new("a").with_small("b");
        assert_eq!(urls.distinct_small(), Some("b"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn descriptor_is_tagged_by_format() {
        let d = BackgroundDescriptor::color("c1", "#101820");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"format": "color", "id": "c1", "color": "#101820"})
        );
    }
}
