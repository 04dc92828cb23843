//! `sitemirror run`: the full synchronize, validate and retry session

use std::path::Path;

use clap::Args;
use sitemirror_common::RetryMode;
use sitemirror_validate::{SessionOutcome, SitePipeline};
use tracing::info;

use super::{discover_routes, load_config, Overrides};
use crate::output::{print_error, print_report, print_success, print_warning, OutputFormat};

/// Exit code after an interrupt
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

pub async fn execute(args: RunArgs, config_path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let config = load_config(config_path, &args.overrides)?;
    let found = discover_routes(&config).await?;

    match config.retry.mode {
        RetryMode::Bounded => info!("Bounded session, at most {} round(s)", config.retry.max_rounds),
        RetryMode::Unbounded => info!("Unbounded session, interrupt with Ctrl-C"),
    }

    let pipeline = SitePipeline::new(&config, found.routes.into_iter().collect())?;
    let mut orchestrator = pipeline.into_orchestrator(&config);

    let outcome = tokio::select! {
        outcome = orchestrator.run() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            print_warning("Interrupted; the last completed round's report is on disk");
            return Ok(EXIT_INTERRUPTED);
        }
    };

    print_report(outcome.report(), format);
    let report_path = config.paths.report_path.display();
    match &outcome {
        SessionOutcome::Passed { rounds, .. } => {
            print_success(&format!("Mirror validated after {} round(s)", rounds));
        }
        SessionOutcome::AttemptsExhausted { rounds, report } => {
            print_error(&format!(
                "{} failure(s) remain after {} round(s), see {}",
                report.failure_count, rounds, report_path
            ));
        }
    }

    Ok(outcome.exit_code())
}
