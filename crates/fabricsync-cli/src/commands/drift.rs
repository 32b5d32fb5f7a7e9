//! Drift command - compare Git against the cluster for every resource

use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::path::Path;

use fabricsync_engine::{DiffEngine, RefreshReport};

use crate::commands::Session;
use crate::display::{self, cell, drift_style, state_style};
use crate::error::{CliError, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DriftOutput<'a> {
    fabric: &'a str,
    summary: String,
    drifted: usize,
    resources: &'a [RefreshReport],
}

/// Options for the drift command
pub struct DriftOptions {
    pub show_diff: bool,
    pub context: usize,
    pub exit_code: bool,
    pub json: bool,
}

/// Run the drift command
pub async fn run(
    snapshot: &Path,
    policy: Option<&Path>,
    options: &DriftOptions,
    now: DateTime<Utc>,
) -> Result<()> {
    let session = Session::open(snapshot, policy)?;

    let mut reports = Vec::new();
    for resource in session.resources().await? {
        reports.push(session.reconciler.refresh_resource(&resource.id, now).await?);
    }
    let drifted = reports.iter().filter(|r| !r.drift.is_in_sync()).count();

    let diff_engine = DiffEngine::with_context(options.context)
        .ignoring(&session.reconciler.policy().ignored_fields);
    let refreshed: Vec<_> = reports.iter().map(|r| r.resource.clone()).collect();
    let diff = diff_engine.diff_resources(&refreshed)?;
    let summary = diff_engine.summary(&diff);

    if options.json {
        display::output_json(&DriftOutput {
            fabric: &session.fabric,
            summary,
            drifted,
            resources: &reports,
        })?;
    } else {
        println!(
            "{} Drift for fabric {}\n",
            style("→").blue(),
            style(&session.fabric).cyan()
        );
        print_table(&reports);

        if options.show_diff && diff.has_changes() {
            display::section("DIFF");
            for change in &diff.changes {
                display::print_unified_diff(&change.to_unified_diff());
                println!();
            }
        }

        let marker = if drifted == 0 {
            style("✓").green()
        } else {
            style("⚠").yellow()
        };
        println!("\n{} {}", marker, summary);
    }

    if options.exit_code && drifted > 0 {
        return Err(CliError::DriftDetected { count: drifted });
    }
    Ok(())
}

fn print_table(reports: &[RefreshReport]) {
    let width = reports
        .iter()
        .map(|r| r.resource.key.to_string().len())
        .max()
        .unwrap_or(0)
        .max("RESOURCE".len());

    println!(
        "{} {} {} {} {}",
        style(format!("{:<width$}", "RESOURCE")).bold(),
        style(format!("{:<20}", "STATE")).bold(),
        style(format!("{:<14}", "DRIFT")).bold(),
        style(format!("{:<6}", "SCORE")).bold(),
        style("CONFLICTS").bold()
    );

    for report in reports {
        let resource = &report.resource;
        let state = match &report.transition {
            Some(t) if t.accepted => format!("{} → {}", t.from, t.to),
            _ => resource.resource_state.to_string(),
        };
        println!(
            "{:<width$} {} {} {:<6.2} {}",
            resource.key.to_string(),
            cell(state, 20, &state_style(resource.resource_state)),
            cell(resource.drift_status, 14, &drift_style(resource.drift_status)),
            resource.drift_score,
            report.conflicts.len()
        );
    }
}
