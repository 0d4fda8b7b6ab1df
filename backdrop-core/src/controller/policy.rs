use backdrop_model::{BackgroundDescriptor, BackgroundSettings, CurrentBackgroundRecord, SourceKind};

/// Whether a load must pick a new background instead of re-applying the
/// persisted one.
pub fn needs_new_background(
    settings: &BackgroundSettings,
    current: Option<&CurrentBackgroundRecord>,
    now_ms: u64,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    let Some(current) = current else {
        return true;
    };
    if current.descriptor.source_kind() != settings.source {
        return true;
    }
    if let BackgroundDescriptor::Color(color) = &current.descriptor {
        return color.color != settings.color;
    }
    match settings.frequency.min_age_ms() {
        None => false,
        Some(min_age) => now_ms.saturating_sub(current.applied_at) >= min_age,
    }
}

/// Built-in descriptor for the solid-color source.
pub fn color_descriptor(color: &str) -> BackgroundDescriptor {
    BackgroundDescriptor::color(format!("{}:{color}", SourceKind::Color), color)
}
