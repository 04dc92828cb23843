//! `sitemirror sync`

use std::path::Path;

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use sitemirror_sync::{HttpFetcher, Synchronizer};

use super::{discover_routes, load_config, Overrides};
use crate::output::{print_error, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Serialize)]
struct SyncRow {
    route: String,
    synced: bool,
    detail: String,
}

impl TableDisplay for SyncRow {
    fn headers() -> Vec<&'static str> {
        vec!["Route", "Status", "Snapshot / Error"]
    }

    fn row(&self) -> Vec<String> {
        let status = if self.synced { "synced" } else { "failed" };
        vec![format!("/{}", self.route), status.to_string(), self.detail.clone()]
    }
}

pub async fn execute(args: SyncArgs, config_path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let config = load_config(config_path, &args.overrides)?;
    let found = discover_routes(&config).await?;

    let fetcher = HttpFetcher::new(&config.sync)?;
    let synchronizer =
        Synchronizer::from_config(&config, fetcher).context("cannot set up synchronization")?;
    let summary = synchronizer.sync_all(&found.routes).await;

    let mut rows: Vec<SyncRow> = summary
        .synced
        .iter()
        .map(|outcome| SyncRow {
            route: outcome.route.as_str().to_string(),
            synced: true,
            detail: outcome.path.display().to_string(),
        })
        .chain(summary.failed.iter().map(|(route, e)| SyncRow {
            route: route.as_str().to_string(),
            synced: false,
            detail: e.to_string(),
        }))
        .collect();
    rows.sort_by(|a, b| a.route.cmp(&b.route));
    print_list(&rows, format);

    if summary.failed.is_empty() {
        if format == OutputFormat::Table {
            print_success(&format!(
                "Synchronized {} route(s) into {}",
                summary.synced.len(),
                synchronizer.output_root().display()
            ));
        }
        Ok(0)
    } else {
        print_error(&format!("{} route(s) failed to synchronize", summary.failed.len()));
        Ok(1)
    }
}
