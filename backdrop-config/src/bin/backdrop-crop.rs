use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use backdrop_config::{BackdropConfig, ConfigSource, telemetry};
use backdrop_core::{
    CropAnalyzer, CropOptions,
    infra::{HttpFetcher, ImageRaster},
};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "backdrop-crop",
    about = "Compute the focal point and cover position Backdrop would use for an image"
)]
struct Cli {
    /// Local path, file:// URL or http(s) URL of the image.
    image: String,

    /// Viewport width / height, e.g. 1.7778 or 16:9.
    #[arg(long, default_value = "16:9")]
    aspect: String,

    /// Configuration file. Without it the usual environment lookup applies.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print CSS declarations instead of JSON.
    #[arg(long)]
    css: bool,
}

fn parse_aspect(raw: &str) -> Result<f64> {
    let aspect = match raw.split_once(':') {
        Some((w, h)) => {
            let w: f64 = w.trim().parse().with_context(|| format!("bad aspect width in {raw:?}"))?;
            let h: f64 = h.trim().parse().with_context(|| format!("bad aspect height in {raw:?}"))?;
            w / h
        }
        None => raw.trim().parse().with_context(|| format!("bad aspect {raw:?}"))?,
    };
    if !aspect.is_finite() || aspect <= 0.0 {
        bail!("aspect must be a positive ratio, got {raw:?}");
    }
    Ok(aspect)
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let (config, source) = match &cli.config {
        Some(path) => (
            BackdropConfig::load_from_file(path)?,
            ConfigSource::File(path.clone()),
        ),
        None => BackdropConfig::load_from_env()?,
    };
    tracing::debug!(?source, "configuration loaded");
    config.validate().log();

    let aspect = parse_aspect(&cli.aspect)?;
    let fetcher = Arc::new(HttpFetcher::new().context("failed to build HTTP client")?);
    let raster = ImageRaster::new(fetcher, config.crop.fetch_timeout())
        .with_readback_hosts(config.crop.readback_hosts.iter().cloned());
    let analyzer = CropAnalyzer::new(Arc::new(raster), CropOptions::from(&config.crop));

    let result = analyzer
        .analyze_crop_for_background(&cli.image, aspect)
        .await;
    if result.is_fallback() {
        tracing::warn!(image = %cli.image, "analysis failed; showing the centered fallback");
    }

    if cli.css {
        println!(
            "background-size: {};\nbackground-position: {} {};",
            result.position.size_css(),
            result.position.x_css(),
            result.position.y_css()
        );
    } else {
        let json = serde_json::to_string_pretty(&result).context("failed to encode result")?;
        println!("{json}");
    }
    Ok(())
}
