use anyhow::{Context, anyhow};
use backdrop_core::{
    AssetStoreLimits, CacheIndexLimits, ControllerOptions, CropOptions, HandleManagerOptions,
    MAX_EVICTION_BATCH, TransitionOptions, crop::MAX_ANALYSIS_EDGE,
};
use backdrop_model::ByteSize;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::validation::ConfigWarnings;

/// Points at a TOML or JSON file.
pub const CONFIG_PATH_ENV: &str = "BACKDROP_CONFIG_PATH";
/// Inline JSON document.
pub const CONFIG_JSON_ENV: &str = "BACKDROP_CONFIG_JSON";

const DEFAULT_FILES: &[&str] = &["backdrop.toml", "backdrop.json"];

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Complete tuning surface of the pipeline. Every section is optional in the
/// file; missing keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackdropConfig {
    pub handles: HandlesSection,
    pub cache: CacheSection,
    pub assets: AssetsSection,
    pub crop: CropSection,
    pub transition: TransitionSection,
    pub controller: ControllerSection,
}

/// Blob handle leak sweep.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlesSection {
    pub sweep_interval_ms: u64,
    /// Idle time before an unreferenced handle counts as leaked.
    pub grace_ms: u64,
}

impl Default for HandlesSection {
    fn default() -> Self {
        let defaults = HandleManagerOptions::default();
        Self {
            sweep_interval_ms: millis(defaults.sweep_interval),
            grace_ms: millis(defaults.grace),
        }
    }
}

/// Remote image byte cache. Zero for `max_entries`, `max_bytes` or `ttl_ms`
/// disables that limit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
    pub max_bytes: u64,
    pub ttl_ms: u64,
    pub cleanup_debounce_ms: u64,
    pub fetch_timeout_ms: u64,
    pub flush_interval_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheIndexLimits::defaults();
        Self {
            max_entries: defaults.max_entries,
            max_bytes: defaults.max_bytes.as_bytes(),
            ttl_ms: millis(defaults.ttl),
            cleanup_debounce_ms: millis(defaults.cleanup_debounce),
            fetch_timeout_ms: millis(defaults.fetch_timeout),
            flush_interval_ms: millis(defaults.flush_interval),
        }
    }
}

/// User-curated asset store. Thumbnails are never evicted; the caps apply to
/// full-resolution blobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AssetsSection {
    pub max_full_images: usize,
    pub max_full_bytes: u64,
    pub eviction_batch: usize,
    pub eviction_delay_ms: u64,
    pub health_check_interval_ms: u64,
    pub health_check_batch: usize,
    /// Consecutive database failures before degraded mode.
    pub degraded_threshold: u32,
    pub degraded_cooldown_ms: u64,
}

impl Default for AssetsSection {
    fn default() -> Self {
        let defaults = AssetStoreLimits::defaults();
        Self {
            max_full_images: defaults.max_full_images,
            max_full_bytes: defaults.max_full_bytes.as_bytes(),
            eviction_batch: defaults.eviction_batch,
            eviction_delay_ms: millis(defaults.eviction_delay),
            health_check_interval_ms: millis(defaults.health_check_interval),
            health_check_batch: defaults.health_check_batch,
            degraded_threshold: defaults.degraded_threshold,
            degraded_cooldown_ms: millis(defaults.degraded_cooldown),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CropSection {
    /// Longest edge of the analysis raster. Values above the analyzer's
    /// ceiling are clamped.
    pub max_edge: u32,
    pub timeout_ms: u64,
    /// Budget for fetching a remote image before decoding it.
    pub fetch_timeout_ms: u64,
    /// Hosts whose pixels may be read back. Empty allows every host.
    pub readback_hosts: Vec<String>,
}

impl Default for CropSection {
    fn default() -> Self {
        let defaults = CropOptions::default();
        Self {
            max_edge: defaults.max_edge,
            timeout_ms: millis(defaults.timeout),
            fetch_timeout_ms: 10_000,
            readback_hosts: Vec::new(),
        }
    }
}

impl CropSection {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransitionSection {
    pub fade_ms: u64,
    pub retire_margin_ms: u64,
    pub preview_timeout_ms: u64,
    pub prepare_timeout_ms: u64,
}

impl Default for TransitionSection {
    fn default() -> Self {
        let defaults = TransitionOptions::default();
        Self {
            fade_ms: millis(defaults.fade),
            retire_margin_ms: millis(defaults.retire_margin),
            preview_timeout_ms: millis(defaults.preview_timeout),
            prepare_timeout_ms: millis(defaults.prepare_timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerSection {
    pub viewport_aspect: f64,
    pub default_image_url: Option<String>,
    pub preload_next: bool,
    pub persist_debounce_ms: u64,
    pub event_capacity: usize,
}

impl Default for ControllerSection {
    fn default() -> Self {
        let defaults = ControllerOptions::default();
        Self {
            viewport_aspect: defaults.viewport_aspect,
            default_image_url: defaults.default_image_url,
            preload_next: defaults.preload_next,
            persist_debounce_ms: millis(defaults.persist_debounce),
            event_capacity: defaults.event_capacity,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<&HandlesSection> for HandleManagerOptions {
    fn from(section: &HandlesSection) -> Self {
        Self {
            sweep_interval: Duration::from_millis(section.sweep_interval_ms),
            grace: Duration::from_millis(section.grace_ms),
        }
    }
}

impl From<&CacheSection> for CacheIndexLimits {
    fn from(section: &CacheSection) -> Self {
        Self {
            max_entries: section.max_entries,
            max_bytes: ByteSize::from_bytes(section.max_bytes),
            ttl: Duration::from_millis(section.ttl_ms),
            cleanup_debounce: Duration::from_millis(section.cleanup_debounce_ms),
            fetch_timeout: Duration::from_millis(section.fetch_timeout_ms),
            flush_interval: Duration::from_millis(section.flush_interval_ms),
        }
    }
}

impl From<&AssetsSection> for AssetStoreLimits {
    fn from(section: &AssetsSection) -> Self {
        Self {
            max_full_images: section.max_full_images,
            max_full_bytes: ByteSize::from_bytes(section.max_full_bytes),
            eviction_batch: section.eviction_batch,
            eviction_delay: Duration::from_millis(section.eviction_delay_ms),
            health_check_interval: Duration::from_millis(section.health_check_interval_ms),
            health_check_batch: section.health_check_batch,
            degraded_threshold: section.degraded_threshold,
            degraded_cooldown: Duration::from_millis(section.degraded_cooldown_ms),
        }
    }
}

impl From<&CropSection> for CropOptions {
    fn from(section: &CropSection) -> Self {
        Self {
            max_edge: section.max_edge,
            timeout: Duration::from_millis(section.timeout_ms),
        }
    }
}

impl From<&TransitionSection> for TransitionOptions {
    fn from(section: &TransitionSection) -> Self {
        Self {
            fade: Duration::from_millis(section.fade_ms),
            retire_margin: Duration::from_millis(section.retire_margin_ms),
            preview_timeout: Duration::from_millis(section.preview_timeout_ms),
            prepare_timeout: Duration::from_millis(section.prepare_timeout_ms),
        }
    }
}

impl From<&ControllerSection> for ControllerOptions {
    fn from(section: &ControllerSection) -> Self {
        Self {
            viewport_aspect: section.viewport_aspect,
            default_image_url: section.default_image_url.clone(),
            preload_next: section.preload_next,
            persist_debounce: Duration::from_millis(section.persist_debounce_ms),
            event_capacity: section.event_capacity,
        }
    }
}

impl BackdropConfig {
    /// Load configuration using environment variables.
    /// Evaluation order:
    /// 1) `$BACKDROP_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$BACKDROP_CONFIG_JSON` (inline JSON),
    /// 3) `backdrop.toml` / `backdrop.json` in the working directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        let cwd = env::current_dir().context("failed to resolve working directory")?;
        Self::load_with(|name| env::var(name).ok(), &cwd)
    }

    /// Same resolution as [`load_from_env`](Self::load_from_env) with the
    /// variable lookup and search directory supplied by the caller.
    pub fn load_with(
        lookup: impl Fn(&str) -> Option<String>,
        dir: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        if let Some(path_str) = lookup(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let parsed =
                Self::parse_json(&raw).with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(dir) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read backdrop config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid backdrop config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid backdrop config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse backdrop config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid backdrop config json: {err}"))
    }

    fn find_default_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Values that load fine but are unlikely to be intended.
    pub fn validate(&self) -> ConfigWarnings {
        let mut warnings = ConfigWarnings::default();

        if self.cache.max_entries == 0 && self.cache.max_bytes == 0 {
            warnings.push_with_hint(
                "cache has neither an entry nor a byte cap; it will grow until TTL expiry",
                "set cache.max_entries or cache.max_bytes",
            );
        }
        if self.cache.fetch_timeout_ms == 0 {
            warnings.push("cache.fetch_timeout_ms is 0; every remote fetch will time out");
        }
        if self.assets.max_full_images == 0 && self.assets.max_full_bytes == 0 {
            warnings.push("asset store keeps full-resolution images without limit");
        }
        if !(1..=MAX_EVICTION_BATCH).contains(&self.assets.eviction_batch) {
            warnings.push(format!(
                "assets.eviction_batch {} is outside 1..={MAX_EVICTION_BATCH} and will be clamped",
                self.assets.eviction_batch
            ));
        }
        if self.crop.max_edge == 0 || self.crop.max_edge > MAX_ANALYSIS_EDGE {
            warnings.push(format!(
                "crop.max_edge {} is outside 1..={MAX_ANALYSIS_EDGE} and will be clamped",
                self.crop.max_edge
            ));
        }
        if self.transition.preview_timeout_ms > self.transition.prepare_timeout_ms {
            warnings.push(
                "transition.preview_timeout_ms exceeds prepare_timeout_ms; previews are cut to the prepare budget",
            );
        }
        let aspect = self.controller.viewport_aspect;
        if !aspect.is_finite() || aspect <= 0.0 {
            warnings.push_with_hint(
                format!("controller.viewport_aspect {aspect} is not a positive ratio"),
                "crop analysis falls back to a centered position",
            );
        }
        if self.controller.event_capacity == 0 {
            warnings.push("controller.event_capacity must be at least 1; 1 will be used");
        }
        if let Some(url) = &self.controller.default_image_url
            && url::Url::parse(url).is_err()
        {
            warnings.push(format!("controller.default_image_url {url:?} is not a valid URL"));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_the_core_defaults() {
        let config = BackdropConfig::default();
        assert_eq!(
            TransitionOptions::from(&config.transition),
            TransitionOptions::default()
        );
        assert_eq!(CacheIndexLimits::from(&config.cache), CacheIndexLimits::defaults());
        assert_eq!(AssetStoreLimits::from(&config.assets), AssetStoreLimits::defaults());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = BackdropConfig::parse_from_str(
            r#"
            [cache]
            max_entries = 10

            [transition]
            fade_ms = 250
            "#,
            "inline",
        )
        .expect("parse");

        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.ttl_ms, CacheSection::default().ttl_ms);
        assert_eq!(
            TransitionOptions::from(&config.transition).fade,
            Duration::from_millis(250)
        );
        assert_eq!(config.crop, CropSection::default());
    }

    #[test]
    fn parse_from_str_accepts_json() {
        let config = BackdropConfig::parse_from_str(
            r#"{ "crop": { "readback_hosts": ["images.example.com"] } }"#,
            "inline",
        )
        .expect("parse json");
        assert_eq!(config.crop.readback_hosts, vec!["images.example.com"]);
    }

    #[test]
    fn env_path_wins_over_inline_json() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[controller]\npreload_next = false\n").expect("write");
        let path_str = path.display().to_string();

        let (config, source) = BackdropConfig::load_with(
            vars(&[
                (CONFIG_PATH_ENV, path_str.as_str()),
                (CONFIG_JSON_ENV, r#"{"controller":{"event_capacity":3}}"#),
            ]),
            dir.path(),
        )
        .expect("load");

        assert_eq!(source, ConfigSource::EnvPath(path));
        assert!(!config.controller.preload_next);
        assert_eq!(config.controller.event_capacity, 64);
    }

    #[test]
    fn inline_json_is_used_without_a_path() {
        let dir = TempDir::new().expect("tempdir");
        let (config, source) = BackdropConfig::load_with(
            vars(&[
                (CONFIG_PATH_ENV, "  "),
                (CONFIG_JSON_ENV, r#"{"handles":{"grace_ms":5}}"#),
            ]),
            dir.path(),
        )
        .expect("load");
        assert_eq!(source, ConfigSource::EnvInline);
        assert_eq!(
            HandleManagerOptions::from(&config.handles).grace,
            Duration::from_millis(5)
        );
    }

    #[test]
    fn default_file_is_found_in_the_directory() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("backdrop.json"), r#"{"crop":{"max_edge":64}}"#)
            .expect("write");

        let (config, source) = BackdropConfig::load_with(vars(&[]), dir.path()).expect("load");
        assert_eq!(source, ConfigSource::File(dir.path().join("backdrop.json")));
        assert_eq!(CropOptions::from(&config.crop).max_edge, 64);
    }

    #[test]
    fn nothing_configured_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let (config, source) = BackdropConfig::load_with(vars(&[]), dir.path()).expect("load");
        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config, BackdropConfig::default());
    }

    #[test]
    fn broken_file_reports_its_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("backdrop.toml");
        fs::write(&path, "[cache\nmax_entries = ").expect("write");

        let err = BackdropConfig::load_from_file(&path).expect_err("invalid toml");
        assert!(err.to_string().contains("backdrop.toml"));
    }

    #[test]
    fn validate_flags_unbounded_budgets_and_oversized_crop_edge() {
        let mut config = BackdropConfig::default();
        config.cache.max_entries = 0;
        config.cache.max_bytes = 0;
        config.crop.max_edge = 512;

        let warnings = config.validate();
        assert_eq!(warnings.items.len(), 2);
        assert!(warnings.items[0].hint.is_some());
        assert!(warnings.items[1].message.contains("512"));
    }

    #[test]
    fn validate_flags_eviction_batch_outside_range() {
        for batch in [0, 21, 500] {
            let mut config = BackdropConfig::default();
            config.assets.eviction_batch = batch;
            let warnings = config.validate();
            assert_eq!(warnings.items.len(), 1, "batch {batch}");
            assert!(warnings.items[0].message.contains("eviction_batch"));
        }

        let mut config = BackdropConfig::default();
        config.assets.eviction_batch = 20;
        assert!(config.validate().is_empty());
    }
}
