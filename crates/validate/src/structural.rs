//! Structural equivalence of the primary content region

use sitemirror_common::{CheckKind, Route, SiteMirrorConfig, StructuralMode, ValidationResult};
use tracing::{debug, warn};

use crate::browser::PageDriver;

/// Outcome of comparing two inner-markup strings
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupComparison {
    pub passed: bool,
    /// `len(local) / len(live)` in length-ratio mode
    pub ratio: Option<f64>,
    pub diagnostic: Option<String>,
}

/// Compare local and live inner markup under `mode`
pub fn compare_markup(local: &str, live: &str, mode: StructuralMode, threshold: f64) -> MarkupComparison {
    match mode {
        StructuralMode::LengthRatio => {
            if live.is_empty() {
                return MarkupComparison {
                    passed: local.is_empty(),
                    ratio: None,
                    diagnostic: (!local.is_empty())
                        .then(|| format!("live content is empty, local has {} bytes", local.len())),
                };
            }

            let ratio = local.len() as f64 / live.len() as f64;
            let passed = ratio >= threshold;
            MarkupComparison {
                passed,
                ratio: Some(ratio),
                diagnostic: (!passed).then(|| {
                    format!(
                        "length ratio {:.4} below {} (local {} bytes, live {} bytes)",
                        ratio,
                        threshold,
                        local.len(),
                        live.len()
                    )
                }),
            }
        }
        StructuralMode::Exact => {
            let passed = local == live;
            MarkupComparison {
                passed,
                ratio: None,
                diagnostic: (!passed).then(|| first_difference(local, live)),
            }
        }
    }
}

/// Describe where two strings first diverge
fn first_difference(local: &str, live: &str) -> String {
    let at = local
        .char_indices()
        .zip(live.chars())
        .find(|((_, a), b)| a != b)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| local.len().min(live.len()));

    let excerpt = |s: &str| -> String { s[at..].chars().take(40).collect() };
    format!(
        "markup differs at byte {}: local {:?} vs live {:?}",
        at,
        excerpt(local),
        excerpt(live)
    )
}

/// Renders both sides and compares the primary content region
pub struct StructuralDiffEngine {
    mode: StructuralMode,
    threshold: f64,
    selectors: Vec<String>,
}

impl StructuralDiffEngine {
    pub fn new(mode: StructuralMode, threshold: f64, selectors: Vec<String>) -> Self {
        Self {
            mode,
            threshold,
            selectors,
        }
    }

    pub fn from_config(config: &SiteMirrorConfig) -> Self {
        Self::new(
            config.validation.structural_mode,
            config.validation.structural_ratio_threshold,
            config.sync.content_selectors.clone(),
        )
    }

    pub async fn check(
        &self,
        driver: &dyn PageDriver,
        route: &Route,
        local_base: &str,
        live_base: &str,
    ) -> ValidationResult {
        let fail = |diagnostic: String| {
            warn!("Structural check failed for {}: {}", route, diagnostic);
            ValidationResult::fail(route.clone(), CheckKind::Structural, diagnostic)
        };

        let live = match driver.inner_html(&route.url_on(live_base), &self.selectors).await {
            Ok(Some(html)) => html,
            Ok(None) => return fail("content region not found on live page".to_string()),
            Err(e) => return fail(format!("live render failed: {}", e)),
        };

        let local = match driver.inner_html(&route.url_on(local_base), &self.selectors).await {
            Ok(Some(html)) => html,
            Ok(None) => return fail("content region not found in local snapshot".to_string()),
            Err(e) => return fail(format!("local render failed: {}", e)),
        };

        let comparison = compare_markup(&local, &live, self.mode, self.threshold);
        let mut result = match comparison.diagnostic {
            Some(diagnostic) if !comparison.passed => fail(diagnostic),
            _ => {
                debug!("Structural check passed for {}", route);
                ValidationResult::pass(route.clone(), CheckKind::Structural)
            }
        };
        if let Some(ratio) = comparison.ratio {
            result = result.with_metric(ratio);
        }
        result
    }
}
