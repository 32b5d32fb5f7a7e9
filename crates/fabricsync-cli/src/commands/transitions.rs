//! Transition commands - inspect the lifecycle table and drive a resource through it

use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::path::Path;

use fabricsync_core::{ResourceState, Trigger};
use fabricsync_engine::{TransitionContext, TransitionRule, rules_from};

use crate::commands::Session;
use crate::display::{self, cell, state_style};
use crate::error::{CliError, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableRow {
    from: ResourceState,
    #[serde(flatten)]
    rule: TransitionRule,
}

/// Print the transition table, optionally only the rules leaving `from`
pub fn run_table(from: Option<ResourceState>, json: bool) -> Result<()> {
    let states = match from {
        Some(state) => vec![state],
        None => ResourceState::ALL.to_vec(),
    };
    let rows: Vec<TableRow> = states
        .into_iter()
        .flat_map(|from| rules_from(from).iter().map(move |rule| TableRow { from, rule: *rule }))
        .collect();

    if json {
        return display::output_json(&rows);
    }

    println!(
        "{} {} {} {} {} {}",
        style(format!("{:<10}", "FROM")).bold(),
        style(format!("{:<10}", "TO")).bold(),
        style(format!("{:<16}", "TRIGGER")).bold(),
        style(format!("{:<22}", "CONDITION")).bold(),
        style(format!("{:<20}", "ACTION")).bold(),
        style("APPROVAL").bold()
    );
    for row in &rows {
        println!(
            "{} {} {:<16} {:<22} {:<20} {}",
            cell(row.from, 10, &state_style(row.from)),
            cell(row.rule.to, 10, &state_style(row.rule.to)),
            row.rule.trigger.to_string(),
            row.rule.condition.to_string(),
            row.rule.action.to_string(),
            if row.rule.requires_user_approval {
                style("required").yellow().to_string()
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// A transition requested from the command line
pub struct TransitionRequest<'a> {
    pub resource: &'a str,
    pub to: ResourceState,
    pub trigger: Trigger,
    pub reason: Option<&'a str>,
    pub approved_by: Option<&'a str>,
}

/// Execute one transition against a snapshot resource
pub async fn run_execute(
    snapshot: &Path,
    policy: Option<&Path>,
    request: &TransitionRequest<'_>,
    json: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let session = Session::open(snapshot, policy)?;
    let resource = session.find(request.resource).await?;

    let reason = request.reason.unwrap_or("requested from cli");
    let mut context = TransitionContext::new(reason).at(now);
    if let Some(user) = request.approved_by {
        context = context.approved_by(user);
    }

    let outcome = session
        .reconciler
        .state_machine()
        .execute_transition(
            &resource,
            request.to,
            request.trigger,
            &context,
            request.approved_by,
        )
        .await?;

    if json {
        display::output_json(&outcome)?;
    } else if outcome.accepted {
        println!(
            "{} {}: {} → {} ({})",
            style("✓").green(),
            style(&resource.key).cyan(),
            state_style(outcome.from).apply_to(outcome.from),
            state_style(outcome.to).apply_to(outcome.to),
            outcome.trigger
        );
        if let Some(alert) = &outcome.alert {
            println!("  {} raised {} alert {}", style("⚠").yellow(), alert.alert_type, alert.id);
        }
    }

    match outcome.rejection {
        Some(rejection) if !outcome.accepted => Err(CliError::validation_with_help(
            rejection.message,
            format!(
                "run `fabricsync transitions --from {}` to list the allowed moves",
                outcome.from
            ),
        )),
        _ => Ok(()),
    }
}
