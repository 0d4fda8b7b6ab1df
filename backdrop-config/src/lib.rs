//! Configuration for the Backdrop pipeline: a layered loader that turns a
//! TOML/JSON document into the core's option types, plus the tracing
//! bootstrap shared by binaries.

pub mod config;
pub mod telemetry;
pub mod validation;

pub use config::{
    AssetsSection, BackdropConfig, CONFIG_JSON_ENV, CONFIG_PATH_ENV, CacheSection, ConfigSource,
    ControllerSection, CropSection, HandlesSection, TransitionSection,
};
pub use validation::{ConfigWarning, ConfigWarnings};
