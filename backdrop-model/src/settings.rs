use crate::background::SourceKind;

/// How often a new background is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Frequency {
    /// Every new tab.
    #[default]
    Tab,
    Hour,
    Day,
    /// Only on explicit refresh.
    Never,
}

impl Frequency {
    /// Minimum age of the current background before it is replaced.
    ///
    /// `Some(0)` means always replace, `None` means never replace implicitly.
    pub const fn min_age_ms(self) -> Option<u64> {
        match self {
            Frequency::Tab => Some(0),
            Frequency::Hour => Some(60 * 60 * 1000),
            Frequency::Day => Some(24 * 60 * 60 * 1000),
            Frequency::Never => None,
        }
    }
}

/// User-facing background knobs, stored in the synchronized area.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct BackgroundSettings {
    pub source: SourceKind,
    pub frequency: Frequency,
    pub color: String,
    pub provider: String,
    pub prepare_timeout_ms: Option<u64>,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Remote,
            frequency: Frequency::Tab,
            color: "#1f2430".to_string(),
            provider: "unsplash".to_string(),
            prepare_timeout_ms: None,
        }
    }
}

/// Partial update for [`BackgroundSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SettingsPatch {
    pub source: Option<SourceKind>,
    pub frequency: Option<Frequency>,
    pub color: Option<String>,
    pub provider: Option<String>,
    pub prepare_timeout_ms: Option<Option<u64>>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch; returns true when the visible background must change.
    pub fn apply_to(&self, settings: &mut BackgroundSettings) -> bool {
        let mut needs_reload = false;
        if let Some(source) = self.source
            && source != settings.source
        {
            settings.source = source;
            needs_reload = true;
        }
        if let Some(provider) = &self.provider
            && provider != &settings.provider
        {
            settings.provider = provider.clone();
            needs_reload |= settings.source == SourceKind::Remote;
        }
        if let Some(color) = &self.color
            && color != &settings.color
        {
            settings.color = color.clone();
            needs_reload |= settings.source == SourceKind::Color;
        }
        if let Some(frequency) = self.frequency {
            settings.frequency = frequency;
        }
        if let Some(timeout) = self.prepare_timeout_ms {
            settings.prepare_timeout_ms = timeout;
        }
        needs_reload
    }
}
