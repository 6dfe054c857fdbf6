//! End-of-run reporting.
//!
//! Two artifacts: a human-readable summary with one line per failed item,
//! and a bare id-per-line list that a later run can consume in
//! "retry only previously failed" mode.

use crate::config::Layout;
use crate::downloader::state::RunState;
use anyhow::{Context, Result};
use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::sync::atomic::Ordering;

pub fn write_report(layout: &Layout, all_ids: &[String], state: &RunState) -> Result<()> {
    let c = &state.counters;
    let mut report = String::new();
    let mut failed_list = String::new();

    writeln!(report, "=== Workshop Skin Download Report ===").unwrap();
    writeln!(
        report,
        "Date:                {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
    .unwrap();
    writeln!(report).unwrap();
    writeln!(report, "Total IDs:           {}", all_ids.len()).unwrap();
    writeln!(report, "Skipped:             {}", c.skipped.load(Ordering::Relaxed)).unwrap();
    writeln!(report, "Success:             {}", c.success.load(Ordering::Relaxed)).unwrap();
    writeln!(report, "Failed (total):      {}", c.failed.load(Ordering::Relaxed)).unwrap();
    writeln!(report, "  Timeouts:          {}", c.timeout.load(Ordering::Relaxed)).unwrap();
    writeln!(report, "  Errors:            {}", c.error.load(Ordering::Relaxed)).unwrap();
    writeln!(report, "  RateLimit:         {}", c.rate_limit.load(Ordering::Relaxed)).unwrap();
    writeln!(report, "  LockFailed:        {}", c.lock_failed.load(Ordering::Relaxed)).unwrap();
    writeln!(
        report,
        "  ValidationFailed:  {}",
        c.validation_failed.load(Ordering::Relaxed)
    )
    .unwrap();
    writeln!(report).unwrap();
    writeln!(report, "--- Failed skin IDs ---").unwrap();

    for id in all_ids {
        let Some(outcome) = state.outcome_of(id) else {
            continue;
        };
        if !outcome.is_terminal() {
            writeln!(report, "{id}  [{}]", outcome.name()).unwrap();
            writeln!(failed_list, "{id}").unwrap();
        }
    }

    let report_path = layout.report_file();
    fs::write(&report_path, report)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    let failed_path = layout.failed_ids_file();
    fs::write(&failed_path, failed_list)
        .with_context(|| format!("Failed to write {}", failed_path.display()))?;
    Ok(())
}
