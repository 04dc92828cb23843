//! One validation round over the artifact tree
//!
//! Stage order is fixed: static analysis, server start and settle,
//! accessibility, broken links, structural and visual diffs, scoring
//! audit, server stop. A stage never depends on the verdicts of the one
//! before it; only the server and browser lifecycles are shared.

use std::time::Duration;

use sitemirror_common::{Route, SiteMirrorConfig, ValidationResult};
use tracing::{info, warn};

use crate::browser::{BrowserConfig, BrowserEngine, PageDriver};
use crate::checkers::{self, ToolRunner};
use crate::error::{ValidateError, ValidateResult};
use crate::server::LocalServer;
use crate::structural::StructuralDiffEngine;
use crate::visual::VisualDiffEngine;

/// Runs every check of a round against a freshly started local server
pub struct RoundValidator {
    config: SiteMirrorConfig,
    runner: ToolRunner,
    structural: StructuralDiffEngine,
    visual: VisualDiffEngine,
}

impl RoundValidator {
    pub fn new(config: &SiteMirrorConfig) -> Self {
        Self {
            runner: ToolRunner::new(Duration::from_secs(config.validation.tool_timeout_secs)),
            structural: StructuralDiffEngine::from_config(config),
            visual: VisualDiffEngine::from_config(config),
            config: config.clone(),
        }
    }

    /// Validate `routes`. Only server and browser lifecycle failures are
    /// returned as errors; everything else is a recorded result.
    pub async fn validate(&self, routes: &[Route]) -> ValidateResult<Vec<ValidationResult>> {
        let root = &self.config.paths.output_root;

        // A round where every route failed to sync has written nothing yet
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            ValidateError::ResourceLifecycle(format!("cannot create artifact root {}: {}", root.display(), e))
        })?;

        info!("Static analysis of {}", root.display());
        let mut results = checkers::static_analysis(&self.runner, &self.config.tools, root, routes).await;

        let mut server = LocalServer::start_settled(
            root,
            self.config.validation.port,
            Duration::from_millis(self.config.validation.settle_delay_ms),
        )
        .await?;

        let browser_config =
            BrowserConfig::from_validation(&self.config.validation, self.config.tools.node.clone());
        let browser = match BrowserEngine::launch(browser_config).await {
            Ok(browser) => browser,
            Err(e) => {
                if let Err(stop) = server.stop().await {
                    warn!("Server stop after failed browser launch: {}", stop);
                }
                return Err(e);
            }
        };

        results.extend(
            self.served_stages(&browser, server.base_url(), browser.debugging_port(), routes)
                .await,
        );

        let closed = browser.close().await;
        let stopped = server.stop().await;
        closed?;
        stopped?;

        Ok(results)
    }

    /// The stages that need the local server, run against `local_base`
    pub async fn served_stages(
        &self,
        driver: &dyn PageDriver,
        local_base: &str,
        debugging_port: u16,
        routes: &[Route],
    ) -> Vec<ValidationResult> {
        let tools = &self.config.tools;
        let live_base = self.config.site.origin.as_str();
        let mut results = Vec::new();

        info!("Accessibility audit of {} route(s)", routes.len());
        for route in routes {
            results.push(checkers::accessibility(&self.runner, tools, route, local_base).await);
        }

        info!("Broken-link check from {}", local_base);
        results.push(checkers::broken_links(&self.runner, tools, local_base).await);

        info!("Structural and visual diffs against {}", live_base);
        for route in routes {
            results.push(self.structural.check(driver, route, local_base, live_base).await);
            results.push(self.visual.check(driver, route, local_base, live_base).await);
        }

        info!("Scoring audit of {} route(s)", routes.len());
        for route in routes {
            results.push(
                checkers::performance(
                    &self.runner,
                    tools,
                    route,
                    local_base,
                    debugging_port,
                    self.config.validation.accessibility_floor,
                )
                .await,
            );
        }

        results
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use sitemirror_common::{CheckKind, ToolCommand};
    use std::path::Path;

    /// Serves fixed markup and a blank screenshot for every URL
    struct FixedPages {
        live_region: Option<&'static str>,
    }

    #[async_trait]
    impl PageDriver for FixedPages {
        async fn inner_html(&self, url: &str, _selectors: &[String]) -> ValidateResult<Option<String>> {
            if url.starts_with("http://127.0.0.1") {
                Ok(Some("<h1>Welcome</h1>".to_string()))
            } else {
                Ok(self.live_region.map(str::to_string))
            }
        }

        async fn screenshot(&self, _url: &str, path: &Path) -> ValidateResult<()> {
            std::fs::create_dir_all(path.parent().unwrap())?;
            RgbaImage::from_pixel(64, 48, Rgba([255, 255, 255, 255]))
                .save(path)
                .map_err(ValidateError::from)
        }
    }

    fn config(dir: &Path) -> SiteMirrorConfig {
        let lighthouse = dir.join("lighthouse.json");
        std::fs::write(
            &lighthouse,
            r#"{"audits":{"first-contentful-paint":{"numericValue":640}},"categories":{"accessibility":{"score":0.97}}}"#,
        )
        .unwrap();

        let mut config = SiteMirrorConfig::default();
        config.site.origin = "https://example.org".to_string();
        config.paths.output_root = dir.join("site");
        config.paths.diff_dir = dir.join("diffs");
        config.paths.screenshot_dir = dir.join("screens");
        config.tools.accessibility = ToolCommand::new(["true"]);
        config.tools.links = ToolCommand::new(["true"]);
        config.tools.performance = ToolCommand::new([
            "sh".to_string(),
            "-c".to_string(),
            format!("cat '{}'", lighthouse.display()),
            "sh".to_string(),
        ]);
        config
    }

    #[tokio::test]
    async fn test_served_stages_all_pass() {
        let dir = tempfile::tempdir().unwrap();
        let validator = RoundValidator::new(&config(dir.path()));
        let routes = vec![Route::root(), Route::new("about-us").unwrap()];
        let driver = FixedPages {
            live_region: Some("<h1>Welcome</h1>"),
        };

        let results = validator
            .served_stages(&driver, "http://127.0.0.1:8080", 9222, &routes)
            .await;

        // accessibility x2, links x1, structural x2, visual x2, performance x2
        assert_eq!(results.len(), 9);
        assert!(results.iter().all(|r| r.passed), "{:?}", results);
        assert!(dir.path().join("diffs/about-us.png").is_file());
        assert!(dir.path().join("diffs/%2F.png").is_file());
    }

    #[tokio::test]
    async fn test_missing_live_region_fails_structural() {
        let dir = tempfile::tempdir().unwrap();
        let validator = RoundValidator::new(&config(dir.path()));
        let routes = vec![Route::new("events").unwrap()];
        let driver = FixedPages { live_region: None };

        let results = validator
            .served_stages(&driver, "http://127.0.0.1:8080", 9222, &routes)
            .await;

        let failed: Vec<_> = results.iter().filter(|r| !r.passed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].check, CheckKind::Structural);
        assert!(failed[0].diagnostic.as_deref().unwrap().contains("live page"));
    }

    /// Stands in for the node runtime: reports an endpoint, then waits for
    /// stdin to close
    fn stub_node() -> ToolCommand {
        ToolCommand::new([
            "sh",
            "-c",
            r#"echo '{"wsEndpoint":"ws://127.0.0.1:1/stub"}'; cat > /dev/null"#,
            "node",
        ])
    }

    #[tokio::test]
    async fn test_validate_creates_missing_artifact_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.validation.port = 0;
        config.validation.settle_delay_ms = 0;
        config.tools.node = stub_node();

        let results = RoundValidator::new(&config).validate(&[]).await.unwrap();

        assert!(dir.path().join("site").is_dir());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].check, CheckKind::Links);
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn test_validate_fails_when_artifact_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.validation.port = 0;
        config.tools.node = stub_node();
        std::fs::write(dir.path().join("site"), "not a directory").unwrap();

        let err = RoundValidator::new(&config).validate(&[]).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
