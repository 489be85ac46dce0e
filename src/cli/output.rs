//! Output formatting for CLI

use crate::models::{Diagnostic, Event, Severity};
use crate::services::cycle::CycleReport;

/// Get ANSI color code based on severity
fn get_color_for_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "\x1b[31m", // Red
        Severity::Warning => "\x1b[33m",  // Yellow
        Severity::Info => "\x1b[36m",     // Cyan
    }
}

/// Reset ANSI color
const COLOR_RESET: &str = "\x1b[0m";

/// One event as a block of text lines, without trailing newline.
#[must_use]
pub fn format_event_text(event: &Event, color: bool) -> String {
    let (start, reset) = if color {
        (get_color_for_severity(event.severity), COLOR_RESET)
    } else {
        ("", "")
    };

    let mut out = format!(
        "{start}{:<8}{reset} {} [{}] rule={} epoch={}",
        event.severity.as_str(),
        event.event_type,
        event.watch_group,
        event.rule_name,
        event.sample_epoch
    );
    for path in &event.affected_paths {
        out.push_str(&format!("\n    {path}"));
        if let Some(changes) = event.change_details.get(path) {
            for (field, delta) in changes {
                out.push_str(&format!("\n        {field}: {} -> {}", delta.old, delta.new));
            }
        }
    }
    out
}

fn format_diagnostic_line(diagnostic: &Diagnostic) -> String {
    format!("  ! {diagnostic}")
}

/// Print one cycle report as human-readable text
pub fn format_text(report: &CycleReport, color: bool) {
    println!(
        "{} @ {}: {} entries (+{} -{} ~{}){}",
        report.watch_group,
        report.sample_epoch,
        report.entry_count,
        report.created,
        report.removed,
        report.modified,
        if report.baseline { " [baseline]" } else { "" }
    );

    if report.events.is_empty() {
        println!("  No events.");
    } else {
        for event in &report.events {
            println!("{}", format_event_text(event, color));
        }
    }

    // Print diagnostics if any
    if !report.diagnostics.is_empty() {
        eprintln!("Diagnostics: {}", report.diagnostics.len());
        let shown = report.diagnostics.len().min(5);
        for diagnostic in &report.diagnostics[..shown] {
            eprintln!("{}", format_diagnostic_line(diagnostic));
        }
        if report.diagnostics.len() > shown {
            eprintln!("  ... and {} more", report.diagnostics.len() - shown);
        }
    }
}

/// Format cycle reports as JSON
#[must_use]
pub fn format_json(reports: &[CycleReport]) -> String {
    let groups: Vec<serde_json::Value> = reports
        .iter()
        .map(|report| {
            serde_json::json!({
                "watch_group": report.watch_group,
                "sample_epoch": report.sample_epoch,
                "entry_count": report.entry_count,
                "baseline": report.baseline,
                "created": report.created,
                "removed": report.removed,
                "modified": report.modified,
                "events": report.events,
                "diagnostics": report.diagnostics,
            })
        })
        .collect();

    let output = serde_json::json!({ "groups": groups });
    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}
