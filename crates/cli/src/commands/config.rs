//! `sitemirror config`

use std::path::Path;

use anyhow::{bail, Context};
use clap::Args;
use sitemirror_common::SiteMirrorConfig;

use super::{load_config, Overrides};
use crate::output::print_success;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write a default configuration file instead of printing
    #[arg(long)]
    pub init: bool,

    /// Overwrite an existing file with --init
    #[arg(long, requires = "init")]
    pub force: bool,

    #[command(flatten)]
    pub overrides: Overrides,
}

pub fn execute(args: ConfigArgs, config_path: &Path) -> anyhow::Result<i32> {
    if args.init {
        if config_path.exists() && !args.force {
            bail!("{} already exists (use --force to overwrite)", config_path.display());
        }

        let mut config = SiteMirrorConfig::default();
        args.overrides.apply(&mut config);
        config.validate().context("invalid configuration")?;
        config.save(config_path)?;

        print_success(&format!("Wrote {}", config_path.display()));
        return Ok(0);
    }

    let config = load_config(config_path, &args.overrides)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(0)
}
