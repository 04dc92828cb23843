//! External checkers: static analysis, accessibility, links and performance
//!
//! Every checker is an opaque command line. A zero exit status passes;
//! anything else fails with the tool's output as the diagnostic.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use sitemirror_common::{CheckKind, Route, ToolCommand, ToolsConfig, ValidationResult};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ValidateError, ValidateResult};

/// Longest diagnostic kept from a tool's output
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Captured result of one tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Combined, trimmed output for the report
    pub fn diagnostic(&self) -> String {
        let combined = match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        };
        truncate(&combined, MAX_DIAGNOSTIC_CHARS)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((at, _)) => format!("{}…", &text[..at]),
        None => text.to_string(),
    }
}

/// Runs external tools with a per-invocation timeout
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `tool` with `args` appended to its configured command line
    pub async fn run<I, S>(&self, tool: &ToolCommand, args: I) -> ValidateResult<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = tool.program().ok_or_else(|| ValidateError::Tool {
            tool: tool.display_name(),
            reason: "empty command".to_string(),
        })?;

        let mut command = Command::new(program);
        command
            .args(tool.args())
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running {}", tool.display_name());
        let output = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ValidateError::Tool {
                    tool: tool.display_name(),
                    reason: format!("cannot start: {}", e),
                })
            }
            Err(_) => {
                return Err(ValidateError::Tool {
                    tool: tool.display_name(),
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                })
            }
        };

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a pass/fail tool and record its verdict for `route`
    pub async fn check<I, S>(&self, tool: &ToolCommand, args: I, route: &Route, check: CheckKind) -> ValidationResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let result = match self.run(tool, args).await {
            Ok(output) if output.success => ValidationResult::pass(route.clone(), check),
            Ok(output) => ValidationResult::fail(route.clone(), check, output.diagnostic()),
            Err(e) => ValidationResult::fail(route.clone(), check, e.to_string()),
        };

        if !result.passed {
            warn!("{} check failed for {}", check, route);
        }
        result
    }
}

/// One file of the artifact tree and the route it is reported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub route: Route,
    /// A page snapshot (`<route>/index.html`) rather than a standalone asset
    pub snapshot: bool,
}

/// Files under `root` with extension `ext`, in path order. A page's
/// `index.html` reports under its route; other files under their
/// relative path.
pub fn artifact_files(root: &Path, ext: &str) -> Vec<ArtifactFile> {
    let mut files: Vec<ArtifactFile> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(ext))
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?;
            let mut segments: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            let snapshot = segments.last().map(String::as_str) == Some(sitemirror_common::route::SNAPSHOT_FILE);
            if snapshot {
                segments.pop();
            }
            let route = Route::new(&segments.join("/")).ok()?;
            Some(ArtifactFile {
                path: e.path().to_path_buf(),
                route,
                snapshot,
            })
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Markup, style, script and spelling checks over the artifact tree.
///
/// Page snapshots are only checked for `routes`; a snapshot left on disk
/// by an earlier round for a route that failed to sync this round is
/// skipped.
pub async fn static_analysis(
    runner: &ToolRunner,
    tools: &ToolsConfig,
    root: &Path,
    routes: &[Route],
) -> Vec<ValidationResult> {
    let mut results = Vec::new();

    let current: HashSet<&Route> = routes.iter().collect();
    let html: Vec<ArtifactFile> = artifact_files(root, "html")
        .into_iter()
        .filter(|file| {
            let keep = !file.snapshot || current.contains(&file.route);
            if !keep {
                debug!("Skipping stale snapshot {}", file.path.display());
            }
            keep
        })
        .collect();
    for file in &html {
        results.push(runner.check(&tools.markup, [&file.path], &file.route, CheckKind::Markup).await);
    }
    for file in artifact_files(root, "css") {
        results.push(runner.check(&tools.style, [&file.path], &file.route, CheckKind::Style).await);
    }
    for file in artifact_files(root, "js") {
        results.push(runner.check(&tools.script, [&file.path], &file.route, CheckKind::Script).await);
    }
    for file in &html {
        results.push(runner.check(&tools.spell, [&file.path], &file.route, CheckKind::Spelling).await);
    }

    results
}

/// Accessibility audit of one served route
pub async fn accessibility(runner: &ToolRunner, tools: &ToolsConfig, route: &Route, local_base: &str) -> ValidationResult {
    runner
        .check(&tools.accessibility, [route.url_on(local_base)], route, CheckKind::Accessibility)
        .await
}

/// Sitewide broken-link check from the server root, reported under the
/// root route
pub async fn broken_links(runner: &ToolRunner, tools: &ToolsConfig, local_base: &str) -> ValidationResult {
    runner
        .check(&tools.links, [format!("{}/", local_base.trim_end_matches('/'))], &Route::root(), CheckKind::Links)
        .await
}

/// Verdict of one performance/accessibility scoring report
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringVerdict {
    pub passed: bool,
    /// First contentful paint in milliseconds
    pub first_paint_ms: Option<f64>,
    pub accessibility: Option<f64>,
    pub diagnostic: Option<String>,
}

/// Judge a scoring report: a first-paint measurement must exist and the
/// accessibility score, when the auditor reports one, must reach `floor`
pub fn evaluate_scoring(report: &Value, floor: f64) -> ScoringVerdict {
    let first_paint_ms = report
        .pointer("/audits/first-contentful-paint/numericValue")
        .and_then(Value::as_f64);
    let accessibility = report
        .pointer("/categories/accessibility/score")
        .and_then(Value::as_f64);

    let diagnostic = match (first_paint_ms, accessibility) {
        (None, _) => Some("no first-contentful-paint measurement".to_string()),
        (_, Some(score)) if score < floor => {
            Some(format!("accessibility score {} below {}", score, floor))
        }
        _ => None,
    };

    ScoringVerdict {
        passed: diagnostic.is_none(),
        first_paint_ms,
        accessibility,
        diagnostic,
    }
}

/// Scoring audit of one served route through the shared browser's
/// debugging port
pub async fn performance(
    runner: &ToolRunner,
    tools: &ToolsConfig,
    route: &Route,
    local_base: &str,
    debugging_port: u16,
    floor: f64,
) -> ValidationResult {
    let args = [
        route.url_on(local_base),
        format!("--port={}", debugging_port),
        "--output=json".to_string(),
        "--output-path=stdout".to_string(),
        "--only-categories=performance,accessibility".to_string(),
        "--quiet".to_string(),
    ];

    let fail = |diagnostic: String| {
        warn!("performance check failed for {}", route);
        ValidationResult::fail(route.clone(), CheckKind::Performance, diagnostic)
    };

    let output = match runner.run(&tools.performance, args).await {
        Ok(output) if output.success => output,
        Ok(output) => return fail(output.diagnostic()),
        Err(e) => return fail(e.to_string()),
    };

    let report: Value = match serde_json::from_str(output.stdout.trim()) {
        Ok(report) => report,
        Err(e) => return fail(format!("unreadable scoring report: {}", e)),
    };

    let verdict = evaluate_scoring(&report, floor);
    let mut result = match verdict.diagnostic {
        Some(diagnostic) => fail(diagnostic),
        None => ValidationResult::pass(route.clone(), CheckKind::Performance),
    };
    if let Some(score) = verdict.accessibility {
        result = result.with_metric(score);
    }
    result
}
