//! steamcmd log classification.
//!
//! One captured log holds several line formats, depending on which layer
//! of steamcmd emitted them:
//!
//! ```text
//! [AppID 252490] Download item 3511955902 result : Locking Failed
//! [AppID 252490] Download item 492051023 result : Failure
//! [AppID 252490] Update canceled: Staged file validation failed (13 missing ...)
//! [AppID 252490] Update canceled: Failed to write patch state file (File locked)
//! Success. Downloaded item 1234567 to ...
//! ERROR! Download item 1234567 failed (Timeout).
//! Timeout downloading item 1234567
//! ```
//!
//! Several failure lines carry no item id at all; those are attributed to
//! the last id seen, and only upgrade an `Error`/`Unknown` classification
//! (a definite result for that id is never overwritten).

use crate::downloader::state::Outcome;
use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Classifier output for one instance log.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub per_item: HashMap<String, Outcome>,
    pub any_rate_limit: bool,
    pub any_timeout: bool,
    pub any_lock_failed: bool,
    pub any_validation_fail: bool,
    pub successes: usize,
    pub failures: usize,
}

impl ParsedLog {
    fn set(&mut self, id: &str, outcome: Outcome) {
        if let Some(slot) = self.per_item.get_mut(id) {
            *slot = outcome;
        }
    }

    /// Attribute an id-less failure line to the last seen id, but only
    /// when its current classification is still generic.
    fn upgrade_last(&mut self, last_id: &str, outcome: Outcome) {
        if last_id.is_empty() {
            return;
        }
        if let Some(slot) = self.per_item.get_mut(last_id) {
            if matches!(*slot, Outcome::Error | Outcome::Unknown) {
                *slot = outcome;
            }
        }
    }
}

/// Map a "result : <reason>" / "failed (<reason>)" string onto an outcome
/// and flag the matching global.
fn classify_reason(reason: &str, parsed: &mut ParsedLog) -> Outcome {
    if reason == "OK" || reason.contains("Success") {
        Outcome::Success
    } else if reason.contains("Locking Failed") || reason.contains("locked") {
        parsed.any_lock_failed = true;
        Outcome::LockFailed
    } else if reason.contains("Timeout") {
        parsed.any_timeout = true;
        Outcome::Timeout
    } else if reason.contains("rate") || reason.contains("Rate") {
        parsed.any_rate_limit = true;
        Outcome::RateLimit
    } else {
        Outcome::Error
    }
}

/// Parse one instance's captured log against the chunk it was given.
/// Every chunk id starts out `Unknown` and keeps that value unless some
/// line says otherwise.
pub fn parse_log(log_path: &Path, chunk: &[String]) -> Result<ParsedLog> {
    let mut parsed = ParsedLog::default();
    for id in chunk {
        parsed.per_item.insert(id.clone(), Outcome::Unknown);
    }

    let text = match fs::read(log_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!("Could not open log {} for parsing: {}", log_path.display(), e);
            return Ok(parsed);
        }
    };

    let re_result = Regex::new(r"\[AppID \d+\] Download item (\d+) result : (.+)").unwrap();
    let re_success = Regex::new(r"Success\. Downloaded item (\d+)").unwrap();
    let re_error = Regex::new(r"ERROR! Download item (\d+) failed \(([^)]+)\)").unwrap();
    let re_timeout = Regex::new(r"Timeout downloading item (\d+)").unwrap();
    let re_validation =
        Regex::new(r"(?i)Staged file validation failed.*?item (\d+)").unwrap();
    let re_patch_lock =
        Regex::new(r"(?i)Failed to write patch state file \(File locked\)").unwrap();
    let re_rate_limit = Regex::new(r"(?i)rate.?limit|too many requests|throttled").unwrap();

    // Context for lines that carry no item id of their own.
    let mut last_id = String::new();

    for line in text.lines() {
        // Workshop log "result :" line
        if let Some(m) = re_result.captures(line) {
            let id = m[1].to_string();
            let outcome = classify_reason(&m[2], &mut parsed);
            if outcome == Outcome::Success {
                parsed.successes += 1;
            } else {
                parsed.failures += 1;
            }
            parsed.set(&id, outcome);
            last_id = id;
            continue;
        }

        // Staged validation failure with an embedded item id
        if let Some(m) = re_validation.captures(line) {
            parsed.set(&m[1], Outcome::ValidationFailed);
            parsed.any_validation_fail = true;
            continue;
        }
        // Staged validation failure without an id - use last_id context
        if line.contains("Staged file validation failed")
            || line.contains("Missing update files")
        {
            parsed.any_validation_fail = true;
            parsed.upgrade_last(&last_id, Outcome::ValidationFailed);
            continue;
        }

        // Patch-state lock (never carries an id)
        if re_patch_lock.is_match(line) {
            parsed.any_lock_failed = true;
            parsed.upgrade_last(&last_id, Outcome::LockFailed);
            continue;
        }

        // Console "Success." line
        if let Some(m) = re_success.captures(line) {
            let id = m[1].to_string();
            if parsed.per_item.contains_key(&id) {
                parsed.set(&id, Outcome::Success);
                parsed.successes += 1;
            }
            last_id = id;
            continue;
        }

        // Console "ERROR!" line
        if let Some(m) = re_error.captures(line) {
            let id = m[1].to_string();
            let outcome = match classify_reason(&m[2], &mut parsed) {
                // "ERROR!" lines are failures even when the reason is odd
                Outcome::Success => Outcome::Error,
                o => o,
            };
            parsed.set(&id, outcome);
            parsed.failures += 1;
            last_id = id;
            continue;
        }

        // Standalone timeout line
        if let Some(m) = re_timeout.captures(line) {
            let id = m[1].to_string();
            parsed.set(&id, Outcome::Timeout);
            parsed.any_timeout = true;
            parsed.failures += 1;
            last_id = id;
            continue;
        }

        // Global rate-limit markers
        if re_rate_limit.is_match(line) {
            parsed.any_rate_limit = true;
        }
    }

    Ok(parsed)
}
