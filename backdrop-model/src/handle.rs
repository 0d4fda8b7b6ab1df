use std::fmt;

/// Opaque reference to an in-memory blob owned by the handle manager.
///
/// Handles are plain values; holding one does not keep the blob alive.
/// Liveness is governed solely by the manager's reference count.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BlobHandle(String);

impl BlobHandle {
    pub const PREFIX: &'static str = "blob:backdrop/";

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blob_url(raw: &str) -> bool {
        raw.starts_with(Self::PREFIX)
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlobHandle").field(&self.0).finish()
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-chosen grouping key for bulk release.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct HandleScope(String);

impl HandleScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope used for handles issued on behalf of a stored asset.
    pub fn for_asset(asset_id: &str) -> Self {
        Self(format!("asset:{asset_id}"))
    }
}

impl fmt::Debug for HandleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandleScope").field(&self.0).finish()
    }
}

impl fmt::Display for HandleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandleScope {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HandleScope {
    fn from(value: String) -> Self {
        Self(value)
    }
}
