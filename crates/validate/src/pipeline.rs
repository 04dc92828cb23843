//! The production round: Synchronizer, Repairer and RoundValidator

use std::path::PathBuf;

use async_trait::async_trait;
use sitemirror_common::{CheckKind, Route, SiteMirrorConfig, ValidationResult};
use sitemirror_sync::{HttpFetcher, Repairer, SharedFragments, SyncError, Synchronizer};
use tracing::info;

use crate::error::ValidateResult;
use crate::orchestrator::{Orchestrator, RetryPolicy, RoundSteps, RoundSync};
use crate::validator::RoundValidator;

/// Record a route that could not be synchronized
pub fn sync_failure(route: &Route, error: &SyncError) -> ValidationResult {
    ValidationResult::fail(route.clone(), CheckKind::Sync, error.to_string())
}

/// Synchronizes and validates a fixed set of discovered routes
pub struct SitePipeline {
    routes: Vec<Route>,
    head_fragment: PathBuf,
    top_panel_fragment: PathBuf,
    synchronizer: Synchronizer,
    repairer: Repairer,
    validator: RoundValidator,
}

impl SitePipeline {
    pub fn new(config: &SiteMirrorConfig, routes: Vec<Route>) -> ValidateResult<Self> {
        let fetcher = HttpFetcher::new(&config.sync)?;
        let synchronizer = Synchronizer::from_config(config, fetcher.clone())?;
        let repairer = Repairer::new(
            fetcher,
            config.origin_url()?,
            synchronizer.fragments().clone(),
            config.paths.output_root.clone(),
        );

        Ok(Self {
            routes,
            head_fragment: config.paths.head_fragment.clone(),
            top_panel_fragment: config.paths.top_panel_fragment.clone(),
            synchronizer,
            repairer,
            validator: RoundValidator::new(config),
        })
    }

    /// Wrap this pipeline in an orchestrator configured from `config`
    pub fn into_orchestrator(self, config: &SiteMirrorConfig) -> Orchestrator<Self> {
        Orchestrator::new(self, RetryPolicy::from_config(&config.retry), config.paths.report_path.clone())
            .with_repair(config.retry.repair)
    }
}

#[async_trait]
impl RoundSteps for SitePipeline {
    async fn synchronize(&mut self, round: u32) -> ValidateResult<RoundSync> {
        // Fragments are re-read every pass so edits between rounds are picked up
        let fragments = SharedFragments::load(&self.head_fragment, &self.top_panel_fragment)?;
        if round > 1 && &fragments != self.synchronizer.fragments() {
            info!("Round {}: shared fragments changed on disk", round);
        }
        self.repairer.set_fragments(fragments.clone());
        self.synchronizer.set_fragments(fragments);

        let summary = self.synchronizer.sync_all(&self.routes).await;

        Ok(RoundSync {
            synced: summary.synced_routes(),
            failures: summary
                .failed
                .iter()
                .map(|(route, e)| sync_failure(route, e))
                .collect(),
        })
    }

    async fn repair(&mut self, round: u32, routes: &[Route]) {
        let outcomes = self.repairer.repair_all(routes).await;
        let changed = outcomes.iter().filter(|o| o.changed()).count();
        info!("Round {}: repaired {} of {} snapshot(s)", round, changed, routes.len());
    }

    async fn validate(&mut self, _round: u32, routes: &[Route]) -> ValidateResult<Vec<ValidationResult>> {
        self.validator.validate(routes).await
    }
}
