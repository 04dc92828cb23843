//! `sitemirror validate`: one round over the snapshots already on disk

use std::path::Path;

use clap::Args;
use sitemirror_common::{CheckKind, Report, Route, ValidationResult};
use sitemirror_validate::RoundValidator;

use super::{discover_routes, load_config, Overrides};
use crate::output::{print_report, OutputFormat};

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

pub async fn execute(args: ValidateArgs, config_path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let config = load_config(config_path, &args.overrides)?;
    let found = discover_routes(&config).await?;

    let mut report = Report::new(1);
    let mut present: Vec<Route> = Vec::new();
    for route in found.routes {
        let snapshot = route.snapshot_path(&config.paths.output_root);
        if snapshot.is_file() {
            present.push(route);
        } else {
            report.record(ValidationResult::fail(
                route,
                CheckKind::Sync,
                format!("no snapshot at {}", snapshot.display()),
            ));
        }
    }

    let results = RoundValidator::new(&config).validate(&present).await?;
    report.extend(results);
    report.persist(&config.paths.report_path)?;

    print_report(&report, format);
    Ok(if report.is_clean() { 0 } else { 1 })
}
