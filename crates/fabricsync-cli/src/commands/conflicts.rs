//! Conflicts command - typed conflicts and resolution plans

use console::style;
use serde_json::Value;
use std::path::Path;

use fabricsync_engine::resolver::ResolutionStep;
use fabricsync_engine::{ResolutionPlan, ResolutionStrategy};

use crate::commands::Session;
use crate::display::{self, severity_style};
use crate::error::{CliError, Result};

/// Run the conflicts command
pub async fn run(
    snapshot: &Path,
    policy: Option<&Path>,
    resource: Option<&str>,
    strategy: ResolutionStrategy,
    show_merged: bool,
    json: bool,
) -> Result<()> {
    let session = Session::open(snapshot, policy)?;

    let targets = match resource {
        Some(key) => vec![session.find(key).await?],
        None => session.resources().await?,
    };

    let mut plans = Vec::new();
    for target in &targets {
        let plan = session.reconciler.plan_resolution(&target.id, strategy).await?;
        if resource.is_some() || !plan.conflicts.is_empty() {
            plans.push(plan);
        }
    }

    if json {
        display::output_json(&plans)?;
    } else {
        println!(
            "{} Conflicts for fabric {} (strategy: {})",
            style("→").blue(),
            style(&session.fabric).cyan(),
            style(strategy).yellow()
        );
        if plans.is_empty() {
            println!("\n{} No conflicts", style("✓").green());
        }
        for plan in &plans {
            print_plan(plan, show_merged)?;
        }
    }

    let blocked: Vec<_> = plans
        .iter()
        .flat_map(|p| p.conflicts.iter().filter(|c| c.is_blocking()))
        .map(|c| c.field_path.clone())
        .collect();
    if !blocked.is_empty() && strategy != ResolutionStrategy::Manual {
        return Err(CliError::ManualReview {
            message: format!("critical conflicts on {}", blocked.join(", ")),
        });
    }
    Ok(())
}

fn print_plan(plan: &ResolutionPlan, show_merged: bool) -> Result<()> {
    display::section(&plan.resource.key.to_string());

    if plan.conflicts.is_empty() {
        println!("  {} No conflicts", style("✓").green());
        return Ok(());
    }

    for (conflict, action) in plan.conflicts.iter().zip(&plan.report.resolution_actions) {
        println!(
            "  {} {:<10} {} {}",
            severity_style(conflict.severity).apply_to(format!("{:<8}", conflict.severity)),
            conflict.conflict_type,
            style(&conflict.field_path).bold(),
            style(format!(
                "{} → {}",
                show_value(conflict.desired_value.as_ref()),
                show_value(conflict.actual_value.as_ref())
            ))
            .dim()
        );
        println!("      plan: {}", step_label(action.step));
    }

    for warning in &plan.report.warnings {
        println!("  {} {}", style("⚠").yellow(), warning);
    }

    println!(
        "  {}/{} resolved",
        plan.report.conflicts_resolved.len(),
        plan.report.conflicts_detected
    );

    if show_merged && let Some(merged) = &plan.merged_spec {
        println!("\n  {}", style("Merged spec:").bold());
        let yaml = serde_yaml::to_string(merged)
            .map_err(|e| CliError::internal(format!("cannot render merged spec: {}", e)))?;
        for line in yaml.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}

fn step_label(step: ResolutionStep) -> console::StyledObject<&'static str> {
    match step {
        ResolutionStep::AdoptDesired => style("keep git value").green(),
        ResolutionStep::AdoptActual => style("take cluster value").cyan(),
        ResolutionStep::ManualReview => style("manual review").red(),
    }
}

fn show_value(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
