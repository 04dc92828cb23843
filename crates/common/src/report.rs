//! Validation results and the per-round report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::route::Route;

/// Kind of check a validation result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Content synchronization of the route
    Sync,
    Markup,
    Style,
    Script,
    Spelling,
    Accessibility,
    Links,
    Structural,
    Visual,
    Performance,
}

impl CheckKind {
    pub const ALL: [CheckKind; 10] = [
        CheckKind::Sync,
        CheckKind::Markup,
        CheckKind::Style,
        CheckKind::Script,
        CheckKind::Spelling,
        CheckKind::Accessibility,
        CheckKind::Links,
        CheckKind::Structural,
        CheckKind::Visual,
        CheckKind::Performance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Sync => "sync",
            CheckKind::Markup => "markup",
            CheckKind::Style => "style",
            CheckKind::Script => "script",
            CheckKind::Spelling => "spelling",
            CheckKind::Accessibility => "accessibility",
            CheckKind::Links => "links",
            CheckKind::Structural => "structural",
            CheckKind::Visual => "visual",
            CheckKind::Performance => "performance",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub route: Route,
    pub check: CheckKind,
    pub passed: bool,
    /// Diff percentage, ratio or score, depending on the check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ValidationResult {
    pub fn pass(route: Route, check: CheckKind) -> Self {
        Self {
            route,
            check,
            passed: true,
            metric: None,
            diagnostic: None,
        }
    }

    pub fn fail(route: Route, check: CheckKind, diagnostic: impl Into<String>) -> Self {
        Self {
            route,
            check,
            passed: false,
            metric: None,
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }
}

/// One failure line in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub route: Route,
    pub diagnostic: String,
}

/// Aggregated outcome of one validation round.
///
/// Failures are keyed by check kind; within a kind they are ordered by
/// route, never by completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub round: u32,
    pub generated_at: DateTime<Utc>,
    pub failure_count: usize,
    pub failures: BTreeMap<CheckKind, Vec<ReportEntry>>,
    pub results: Vec<ValidationResult>,
}

impl Report {
    pub fn new(round: u32) -> Self {
        Self {
            round,
            generated_at: Utc::now(),
            failure_count: 0,
            failures: BTreeMap::new(),
            results: Vec::new(),
        }
    }

    /// Record a result. Results are immutable once recorded.
    pub fn record(&mut self, result: ValidationResult) {
        if !result.passed {
            let entries = self.failures.entry(result.check).or_default();
            let entry = ReportEntry {
                route: result.route.clone(),
                diagnostic: result
                    .diagnostic
                    .clone()
                    .unwrap_or_else(|| format!("{} check failed", result.check)),
            };
            let at = entries.partition_point(|e| e.route <= entry.route);
            entries.insert(at, entry);
            self.failure_count += 1;
        }
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ValidationResult>) {
        for result in results {
            self.record(result);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count == 0
    }

    pub fn failures_for(&self, check: CheckKind) -> &[ReportEntry] {
        self.failures.get(&check).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pass/fail tally per check kind, in `CheckKind` order
    pub fn tally(&self) -> Vec<(CheckKind, usize, usize)> {
        CheckKind::ALL
            .iter()
            .filter_map(|kind| {
                let (passed, failed) = self
                    .results
                    .iter()
                    .filter(|r| r.check == *kind)
                    .fold((0usize, 0usize), |(p, f), r| if r.passed { (p + 1, f) } else { (p, f + 1) });
                (passed + failed > 0).then_some((*kind, passed, failed))
            })
            .collect()
    }

    /// Write the report as pretty JSON, replacing any previous report
    pub fn persist(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)?;

        info!("Report for round {} written to: {}", self.round, path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
