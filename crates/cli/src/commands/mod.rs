//! CLI Commands

pub mod config;
pub mod discover;
pub mod run;
pub mod sync;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use clap::Args;
use sitemirror_common::{RetryMode, SiteMirrorConfig, StructuralMode};
use sitemirror_sync::{Discovery, HttpFetcher, RouteDiscovery};
use tracing::info;

/// Settings that override the configuration file
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Live site origin
    #[arg(long, env = "SITEMIRROR_ORIGIN")]
    pub origin: Option<String>,

    /// Maximum rounds in bounded mode
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Retry until a round is clean
    #[arg(long)]
    pub unbounded: bool,

    /// Structural comparison: length_ratio or exact
    #[arg(long)]
    pub structural_mode: Option<StructuralMode>,

    /// Visual threshold in percent of differing pixels
    #[arg(long)]
    pub visual_threshold: Option<f64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut SiteMirrorConfig) {
        if let Some(origin) = &self.origin {
            config.site.origin = origin.clone();
        }
        if let Some(max_rounds) = self.max_rounds {
            config.retry.mode = RetryMode::Bounded;
            config.retry.max_rounds = max_rounds;
        }
        if self.unbounded {
            config.retry.mode = RetryMode::Unbounded;
        }
        if let Some(mode) = self.structural_mode {
            config.validation.structural_mode = mode;
        }
        if let Some(threshold) = self.visual_threshold {
            config.validation.visual_threshold_percent = threshold;
        }
    }
}

/// Load the configuration file and apply command-line overrides
pub fn load_config(path: &Path, overrides: &Overrides) -> anyhow::Result<SiteMirrorConfig> {
    let mut config = SiteMirrorConfig::load(path)
        .with_context(|| format!("cannot load configuration {}", path.display()))?;
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Discover the live site's routes
pub async fn discover_routes(config: &SiteMirrorConfig) -> anyhow::Result<Discovery> {
    let fetcher = HttpFetcher::new(&config.sync)?;
    let origin = config.origin_url()?;
    let discovery = RouteDiscovery::new(&fetcher, origin, config.site.index_path.clone());

    let found = discovery
        .discover()
        .await
        .with_context(|| format!("route discovery failed for {}", config.site.origin))?;
    info!("Discovered {} route(s) via {:?}", found.routes.len(), found.source);
    Ok(found)
}
