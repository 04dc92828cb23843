//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use sitemirror_common::Report;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }

            let mut table = new_table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
    }
}

/// Print a round report: per-check tally, failure details and a summary line
pub fn print_report(report: &Report, format: OutputFormat) {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        return;
    }

    let mut tally = new_table();
    tally.set_header(vec!["Check", "Passed", "Failed"]);
    for (kind, passed, failed) in report.tally() {
        let failed_cell = if failed > 0 {
            Cell::new(failed).fg(Color::Red)
        } else {
            Cell::new(failed)
        };
        tally.add_row(vec![Cell::new(kind), Cell::new(passed), failed_cell]);
    }
    println!("{tally}");

    if !report.is_clean() {
        let mut failures = new_table();
        failures.set_header(vec!["Check", "Route", "Diagnostic"]);
        for (kind, entries) in &report.failures {
            for entry in entries {
                failures.add_row(vec![
                    kind.to_string(),
                    format!("/{}", entry.route.as_str()),
                    first_line(&entry.diagnostic),
                ]);
            }
        }
        println!("{failures}");
    }

    println!("{}", summary_line(report));
}

/// One-line verdict for a round
pub fn summary_line(report: &Report) -> String {
    let checks = report.results.len();
    if report.is_clean() {
        format!("Round {}: all {} checks passed", report.round, checks)
            .green()
            .bold()
            .to_string()
    } else {
        format!(
            "Round {}: {} of {} checks failed",
            report.round, report.failure_count, checks
        )
        .red()
        .bold()
        .to_string()
    }
}

fn first_line(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default().to_string();
    if lines.next().is_some() {
        format!("{} …", first)
    } else {
        first
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
