//! Reconcile command - remediate every open alert of a fabric in one batch

use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;

use fabricsync_core::ResourceKey;
use fabricsync_engine::batch::REQUESTED_BY_KEY;
use fabricsync_engine::{AlertStatistics, BatchStatus, BatchStrategy, BatchSummary};

use crate::commands::Session;
use crate::display::{self, item_marker};
use crate::error::{CliError, Result};

/// Options for the reconcile command
pub struct ReconcileOptions {
    pub strategy: BatchStrategy,
    pub dry_run: bool,
    pub requested_by: Option<String>,
    /// Resources whose collaborator calls should fail
    pub fail_on: Vec<String>,
    pub json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileOutput {
    fabric: String,
    drifted: usize,
    orphans: usize,
    statistics: AlertStatistics,
    batch: Option<BatchSummary>,
}

/// Run the reconcile command
pub async fn run(
    snapshot: &Path,
    policy: Option<&Path>,
    options: &ReconcileOptions,
    now: DateTime<Utc>,
) -> Result<()> {
    let session = Session::open(snapshot, policy)?;
    for key in &options.fail_on {
        let key: ResourceKey = key.parse()?;
        session.git.fail_on(key.clone());
        session.cluster.fail_on(key);
    }

    let scan = session.reconciler.scan_fabric(&session.fabric, now).await?;

    let mut resource_ids: Vec<String> = Vec::new();
    for alert in session.reconciler.alerts().queue(&session.fabric, now).await? {
        if !resource_ids.contains(&alert.resource_id) {
            resource_ids.push(alert.resource_id);
        }
    }
    let mut resources = Vec::with_capacity(resource_ids.len());
    for id in &resource_ids {
        resources.push(session.reconciler.resources().get(id).await?);
    }

    let summary = if resources.is_empty() {
        None
    } else {
        let mut metadata = Map::new();
        if let Some(user) = &options.requested_by {
            metadata.insert(REQUESTED_BY_KEY.to_string(), Value::from(user.clone()));
        }
        let batches = session.reconciler.batches();
        let operation = batches
            .create_batch_operation(&resources, options.strategy, metadata)
            .await?;
        tracing::info!(
            batch = %operation.batch_id,
            items = operation.total,
            strategy = %options.strategy,
            "batch created"
        );
        Some(batches.execute_batch(&operation.batch_id, options.dry_run).await?)
    };

    if options.json {
        display::output_json(&ReconcileOutput {
            fabric: session.fabric.clone(),
            drifted: scan.drifted(),
            orphans: scan.orphans.len(),
            statistics: scan.statistics.clone(),
            batch: summary.clone(),
        })?;
    } else {
        println!(
            "{} Reconciling fabric {}{}",
            style("→").blue(),
            style(&session.fabric).cyan(),
            if options.dry_run {
                style(" (dry run)").yellow().to_string()
            } else {
                String::new()
            }
        );
        println!(
            "  {} resource(s) scanned, {} drifted, {} orphaned, {} open alert(s)",
            scan.refreshed.len(),
            scan.drifted(),
            scan.orphans.len(),
            scan.statistics.open
        );
        match &summary {
            None => println!("\n{} Nothing to reconcile", style("✓").green()),
            Some(summary) => print_summary(summary),
        }
    }

    match summary {
        Some(summary) if summary.status != BatchStatus::Completed || summary.failed > 0 => {
            Err(CliError::ReconcileFailed {
                help: summary.error.clone(),
                batch_id: summary.batch_id,
                status: summary.status.to_string(),
                failed: summary.failed,
            })
        }
        _ => Ok(()),
    }
}

fn print_summary(summary: &BatchSummary) {
    display::section(&format!("BATCH {}", summary.batch_id));
    println!("  Strategy:   {}", style(summary.strategy).yellow());
    println!("  Status:     {}", summary.status);
    println!(
        "  Processed:  {}/{} ({} succeeded, {} failed)",
        summary.processed, summary.total, summary.successful, summary.failed
    );
    if let Some(ms) = summary.processing_time_ms {
        println!("  Duration:   {}ms", ms);
    }

    println!();
    for item in &summary.items {
        println!(
            "  {} {} {} {}",
            item_marker(item.status),
            item.resource,
            style(item.action).cyan(),
            item.message
                .as_deref()
                .map(|m| style(m).dim().to_string())
                .unwrap_or_default()
        );
    }
    if let Some(error) = &summary.error {
        println!("\n  {} {}", style("✗").red(), error);
    }
}
