//! Display formatting for CLI output
//!
//! Colors for lifecycle states, drift statuses and severities, plus the
//! unified diff and section header helpers shared by every command.

use console::{Style, StyledObject, style};
use serde::Serialize;

use fabricsync_core::{DriftStatus, ResourceState, Severity};
use fabricsync_engine::ItemStatus;

use crate::error::Result;

/// Print a value as pretty JSON on stdout
pub fn output_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a bold, underlined section title
pub fn section(title: &str) {
    println!("\n{}", style(title).bold().underlined());
}

pub fn state_style(state: ResourceState) -> Style {
    match state {
        ResourceState::Synced => Style::new().green(),
        ResourceState::Drifted => Style::new().yellow(),
        ResourceState::Orphaned => Style::new().red(),
        ResourceState::Pending => Style::new().cyan(),
        ResourceState::Committed => Style::new().blue(),
        ResourceState::Draft => Style::new().dim(),
    }
}

pub fn drift_style(status: DriftStatus) -> Style {
    match status {
        DriftStatus::InSync => Style::new().green(),
        DriftStatus::SpecDrift => Style::new().yellow(),
        DriftStatus::DesiredOnly | DriftStatus::ActualOnly => Style::new().red(),
        DriftStatus::CreationPending | DriftStatus::DeletionPending => Style::new().cyan(),
    }
}

pub fn severity_style(severity: Severity) -> Style {
    match severity {
        Severity::Critical => Style::new().red().bold(),
        Severity::High => Style::new().red(),
        Severity::Medium => Style::new().yellow(),
        Severity::Low => Style::new().dim(),
    }
}

/// Symbol and style for a batch item
pub fn item_marker(status: ItemStatus) -> StyledObject<&'static str> {
    match status {
        ItemStatus::Succeeded => style("✓").green(),
        ItemStatus::Failed => style("✗").red(),
        ItemStatus::Skipped => style("↷").yellow(),
        ItemStatus::Pending | ItemStatus::Running => style("•").dim(),
    }
}

/// Print a unified diff with added lines green and removed lines red
pub fn print_unified_diff(diff: &str) {
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            println!("{}", style(line).bold());
        } else if line.starts_with('+') {
            println!("{}", style(line).green());
        } else if line.starts_with('-') {
            println!("{}", style(line).red());
        } else if line == "..." {
            println!("{}", style(line).dim());
        } else {
            println!("{}", line);
        }
    }
}

/// Pad `text` to `width` before styling, so escape codes do not break column alignment
pub fn cell(text: impl std::fmt::Display, width: usize, style: &Style) -> String {
    style.apply_to(format!("{:<width$}", text.to_string())).to_string()
}
