//! `warden simulate`: replay a scenario file and print what happened.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use warden_core::Scenario;
use warden_core::replay::{ReplayReport, replay};

pub fn run(path: &Path, json: bool) -> anyhow::Result<ReplayReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    let scenario = Scenario::from_json(&text)
        .with_context(|| format!("invalid scenario {}", path.display()))?;
    let report = replay(&scenario)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(report)
}

/// Human-readable report: one line per step, then prompts and mismatches.
pub fn render(report: &ReplayReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "scenario: {}", report.name);
    for entry in &report.timeline {
        let _ = writeln!(
            out,
            "  {:>9}  {:<8}  {}",
            clock_label(entry.at_secs),
            entry.phase.as_str(),
            entry.action.as_deref().unwrap_or("-")
        );
    }
    let _ = writeln!(out, "warnings shown: {}", report.warnings);
    for closed in &report.closed {
        let _ = writeln!(out, "closed: {} ({})", closed.message, closed.reason);
    }
    if report.is_success() {
        let _ = writeln!(out, "ok");
    } else {
        for mismatch in &report.mismatches {
            let _ = writeln!(out, "MISMATCH {mismatch}");
        }
    }
    out
}

fn clock_label(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
