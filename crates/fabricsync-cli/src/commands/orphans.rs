//! Orphans command - cluster resources that Git does not know about

use chrono::{DateTime, Utc};
use console::style;
use std::path::Path;

use fabricsync_engine::OrphanReport;

use crate::commands::Session;
use crate::display::{self, cell, severity_style};
use crate::error::Result;

/// Run the orphans command
pub async fn run(
    snapshot: &Path,
    policy: Option<&Path>,
    json: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let session = Session::open(snapshot, policy)?;
    let reports = session.reconciler.detect_orphans(&session.fabric, now).await?;

    if json {
        return display::output_json(&reports);
    }

    println!(
        "{} Orphans in fabric {}\n",
        style("→").blue(),
        style(&session.fabric).cyan()
    );

    if reports.is_empty() {
        println!("{} No orphaned resources", style("✓").green());
        return Ok(());
    }

    print_table(&reports);
    println!(
        "\n{} {} orphaned resource(s)",
        style("⚠").yellow(),
        reports.len()
    );
    Ok(())
}

fn print_table(reports: &[OrphanReport]) {
    let width = reports
        .iter()
        .map(|r| r.finding.key.to_string().len())
        .max()
        .unwrap_or(0)
        .max("RESOURCE".len());

    println!(
        "{} {} {} {}",
        style(format!("{:<width$}", "RESOURCE")).bold(),
        style(format!("{:<12}", "ORPHANED")).bold(),
        style(format!("{:<10}", "SEVERITY")).bold(),
        style("SUGGESTED ACTIONS").bold()
    );

    for report in reports {
        let actions: Vec<_> = report
            .alert
            .alert_type
            .suggested_actions()
            .iter()
            .map(|a| a.to_string())
            .collect();
        println!(
            "{:<width$} {:<12} {} {}",
            report.finding.key.to_string(),
            format_age(report.finding.orphaned_secs()),
            cell(report.finding.severity, 10, &severity_style(report.finding.severity)),
            actions.join(", ")
        );
    }
}

/// Largest whole unit of an age in seconds
fn format_age(secs: i64) -> String {
    match secs {
        s if s >= 86_400 => format!("{}d", s / 86_400),
        s if s >= 3_600 => format!("{}h", s / 3_600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(0), "0s");
        assert_eq!(format_age(59), "59s");
        assert_eq!(format_age(3_599), "59m");
        assert_eq!(format_age(7_200), "2h");
        assert_eq!(format_age(2 * 86_400 + 5), "2d");
    }
}
