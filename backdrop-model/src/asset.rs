use std::fmt;

/// Which resolution tier of a stored asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AssetTier {
    Thumbnail,
    Full,
}

impl AssetTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            AssetTier::Thumbnail => "thumbnail",
            AssetTier::Full => "full",
        }
    }
}

impl fmt::Display for AssetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AssetStatus {
    #[default]
    Valid,
    Invalid,
}

/// Record describing a user-curated background.
///
/// The blob bytes live beside the record in the asset database; the record
/// carries their sizes so eviction planning never has to materialize them.
/// A tier is present iff its size is `Some`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AssetRecord {
    pub id: String,
    pub thumbnail_size: Option<u64>,
    pub full_size: Option<u64>,
    pub cached_at: u64,
    pub last_accessed_at: u64,
    pub is_user_pinned: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub status: AssetStatus,
    pub provider: String,
    pub source_url: String,
}

impl AssetRecord {
    pub fn new_thumbnail(
        id: impl Into<String>,
        provider: impl Into<String>,
        source_url: impl Into<String>,
        thumbnail_size: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            thumbnail_size: Some(thumbnail_size),
            full_size: None,
            cached_at: now_ms,
            last_accessed_at: now_ms,
            is_user_pinned: false,
            status: AssetStatus::Valid,
            provider: provider.into(),
            source_url: source_url.into(),
        }
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail_size.is_some()
    }

    pub fn has_full(&self) -> bool {
        self.full_size.is_some()
    }

    pub fn has_tier(&self, tier: AssetTier) -> bool {
        match tier {
            AssetTier::Thumbnail => self.has_thumbnail(),
            AssetTier::Full => self.has_full(),
        }
    }

    /// A record without any blob is treated as deleted.
    pub fn is_empty(&self) -> bool {
        !self.has_thumbnail() && !self.has_full()
    }

    pub fn is_invalid(&self) -> bool {
        self.status == AssetStatus::Invalid
    }
}

/// Identifier/source pair handed to the external health validator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct HealthCheckCandidate {
    pub id: String,
    pub source_url: String,
}
