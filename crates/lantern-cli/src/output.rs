//! Plain-text rendering of reports, checkpoints and totals.

use lantern_core::{ScanCheckpoint, ScanTotals};
use lantern_scanner::{ScanReport, SpaceOutcome, SpaceScanStatus};
use std::fmt::Write;

fn outcome_label(outcome: SpaceOutcome) -> &'static str {
    match outcome {
        SpaceOutcome::Completed => "completed",
        SpaceOutcome::Failed => "failed",
        SpaceOutcome::AlreadyCompleted => "already completed",
        SpaceOutcome::AlreadyFailed => "already failed",
        SpaceOutcome::NotFound => "not found",
        SpaceOutcome::Paused => "paused",
        SpaceOutcome::Conflict => "in use elsewhere",
    }
}

/// One line per category, `  TYPE  count`, sorted by type.
fn write_totals(out: &mut String, totals: &ScanTotals) {
    let _ = writeln!(
        out,
        "pages: {}  attachments: {}  errors: {}  entities: {}",
        totals.pages_scanned,
        totals.attachments_scanned,
        totals.error_events,
        totals.entity_count()
    );
    for (category, count) in &totals.entities {
        let _ = writeln!(out, "  {category:<16} {count}");
    }
}

/// Render the outcome of a scan request.
pub fn render_report(report: &ScanReport) -> String {
    let mut out = String::new();
    let state = if report.completed { "completed" } else { "incomplete" };
    let _ = writeln!(out, "scan {} {state}", report.scan_id);

    let mut spaces: Vec<_> = report.spaces.iter().collect();
    spaces.sort_by(|a, b| a.space_key.cmp(&b.space_key));
    for space in spaces {
        let _ = write!(
            out,
            "  {:<20} {:<18} items: {:<6} item errors: {}",
            space.space_key.as_str(),
            outcome_label(space.outcome),
            space.items_scanned,
            space.item_errors
        );
        if let Some(error) = &space.error {
            let _ = write!(out, "  ({error})");
        }
        out.push('\n');
    }

    write_totals(&mut out, &report.totals);
    if !report.completed {
        let _ = writeln!(
            out,
            "resume with: lantern scan <root> --scan-id {}",
            report.scan_id
        );
    }
    out
}

/// Render the totals of one space.
pub fn render_totals(totals: &ScanTotals) -> String {
    let mut out = String::new();
    write_totals(&mut out, totals);
    out
}

/// Render one checkpoint as a single line.
pub fn render_checkpoint(checkpoint: &ScanCheckpoint) -> String {
    let cursor = match (&checkpoint.cursor.page_id, &checkpoint.cursor.attachment_name) {
        (None, _) => "-".to_string(),
        (Some(page), None) => page.clone(),
        (Some(page), Some(attachment)) => format!("{page} [{attachment}]"),
    };
    let mut line = format!(
        "{:<20} {:<9} {:>5}/{:<5} {:<32} {} {}",
        checkpoint.space_key.as_str(),
        checkpoint.status,
        checkpoint.pages_processed,
        checkpoint.total_pages,
        cursor,
        checkpoint.updated_at.to_rfc3339(),
        checkpoint.owner
    );
    if let Some(error) = &checkpoint.error_message {
        let _ = write!(line, "  ({error})");
    }
    line
}

/// Render one catalog row.
pub fn render_space_status(status: &SpaceScanStatus) -> String {
    let latest = status.latest.as_ref().map_or_else(
        || "never scanned".to_string(),
        |checkpoint| {
            format!(
                "{} in {} at {}",
                checkpoint.status,
                checkpoint.scan_id,
                checkpoint.updated_at.to_rfc3339()
            )
        },
    );
    let marker = if status.stale { "stale" } else { "fresh" };
    format!("{:<20} {marker:<6} {latest}", status.space.key.as_str())
}
