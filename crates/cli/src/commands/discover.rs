//! `sitemirror discover`

use std::path::Path;

use clap::Args;
use serde::Serialize;
use sitemirror_sync::DiscoverySource;

use super::{discover_routes, load_config, Overrides};
use crate::output::{print_info, print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Serialize)]
struct RouteRow {
    route: String,
    url: String,
}

impl TableDisplay for RouteRow {
    fn headers() -> Vec<&'static str> {
        vec!["Route", "Live URL"]
    }

    fn row(&self) -> Vec<String> {
        vec![format!("/{}", self.route), self.url.clone()]
    }
}

pub async fn execute(args: DiscoverArgs, config_path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let config = load_config(config_path, &args.overrides)?;
    let found = discover_routes(&config).await?;

    let rows: Vec<RouteRow> = found
        .routes
        .iter()
        .map(|route| RouteRow {
            route: route.as_str().to_string(),
            url: route.url_on(&config.site.origin),
        })
        .collect();

    if format == OutputFormat::Table {
        let source = match found.source {
            DiscoverySource::Index => format!("site index {}", config.site.index_path),
            DiscoverySource::Crawl => "home page links".to_string(),
        };
        print_info(&format!("{} route(s) from {}", rows.len(), source));
    }
    print_list(&rows, format);

    Ok(0)
}
