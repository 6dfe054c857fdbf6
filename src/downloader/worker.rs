//! One steamcmd instance in its own isolated install directory.
//!
//! Isolation is the whole point: steamcmd writes patch-state lockfiles
//! inside its install dir, and parallel instances sharing one directory
//! are exactly what produces the `LockFailed`/`ValidationFailed`
//! pathologies this tool exists to tolerate. After a successful download
//! the item directory is moved from the instance tree into the shared
//! content tree, and the filesystem - not the log - is the authority on
//! what succeeded.

use crate::config::{Layout, BASE_TIMEOUT_SEC, RATELIMIT_BACKOFF_SEC};
use crate::downloader::logparse::{self, ParsedLog};
use crate::downloader::script;
use crate::downloader::state::{Outcome, RunState};
use crate::{fsutil, staging};
use std::fs;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

/// Run one instance over its chunk. At return every chunk id has a final
/// outcome recorded and every confirmed download sits in the shared tree.
pub async fn run_instance(
    layout: Arc<Layout>,
    state: Arc<RunState>,
    chunk: Vec<String>,
    index: usize,
    pass: usize,
) {
    if chunk.is_empty() {
        return;
    }

    let instance_dir = layout.instance_dir(index);
    if let Err(e) = fs::create_dir_all(&instance_dir) {
        warn!("Could not create {}: {}", instance_dir.display(), e);
    }

    // Stale partial downloads in this instance's staging dirs would
    // trip "Staged file validation failed" on the very first item.
    staging::clean_instance_staging(&instance_dir);

    if let Err(e) = script::write_script(&layout, index, &chunk) {
        warn!("[t{index}] {e:#}");
        record_chunk(&state, &layout, &chunk, index, false);
        return;
    }

    info!(
        "[t{index}][p{pass}] Starting steamcmd | dir={} | items={}",
        instance_dir.display(),
        chunk.len()
    );

    let started = Instant::now();
    let timed_out = run_steamcmd(&layout, index, pass, chunk.len()).await;

    let _ = fs::remove_file(layout.script_path(index));

    let parsed = match logparse::parse_log(&layout.instance_log(pass, index), &chunk) {
        Ok(p) => p,
        Err(e) => {
            warn!("[t{index}] Log parse failed: {e:#}");
            ParsedLog::default()
        }
    };

    info!(
        "[t{index}] Finished in {}s | ok={} fail={} rl={} tm={} lk={} vf={}",
        started.elapsed().as_secs(),
        parsed.successes,
        parsed.failures,
        parsed.any_rate_limit,
        parsed.any_timeout,
        parsed.any_lock_failed,
        parsed.any_validation_fail
    );

    if parsed.any_rate_limit {
        state
            .any_rate_limit
            .store(true, std::sync::atomic::Ordering::Relaxed);
        warn!("[t{index}] Rate limit observed - backing off {RATELIMIT_BACKOFF_SEC}s");
        tokio::time::sleep(Duration::from_secs(RATELIMIT_BACKOFF_SEC)).await;
    }

    reconcile(&state, &layout, &chunk, index, timed_out, &parsed);

    // Leave the instance clean for the next pass.
    staging::clean_instance_staging(&instance_dir);
}

/// Spawn steamcmd with output captured to the per-pass log and wait for it
/// under the hard timeout. Returns whether the timeout fired.
async fn run_steamcmd(layout: &Layout, index: usize, pass: usize, items: usize) -> bool {
    let log_path = layout.instance_log(pass, index);
    let log_file = match fs::File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("[t{index}] Could not create log {}: {}", log_path.display(), e);
            return false;
        }
    };
    let log_err = match log_file.try_clone() {
        Ok(f) => f,
        Err(e) => {
            warn!("[t{index}] Could not clone log handle: {e}");
            return false;
        }
    };

    let mut child = match Command::new(layout.steamcmd())
        .arg("+runscript")
        .arg(layout.script_path(index))
        .current_dir(&layout.root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_err))
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            // Outcomes stay Unknown; reconcile may still find files on disk.
            warn!("[t{index}] Could not spawn steamcmd: {e}");
            return false;
        }
    };

    let budget = Duration::from_secs(BASE_TIMEOUT_SEC * items as u64);
    match tokio::time::timeout(budget, child.wait()).await {
        Ok(Ok(status)) => {
            info!("[t{index}] steamcmd exited with {status}");
            false
        }
        Ok(Err(e)) => {
            warn!("[t{index}] Wait on steamcmd failed: {e}");
            false
        }
        Err(_) => {
            warn!(
                "[t{index}] Hard timeout after {}s - killing steamcmd",
                budget.as_secs()
            );
            let _ = child.start_kill();
            kill_stray_steamcmd();
            let _ = child.wait().await;
            true
        }
    }
}

/// Sweep any steamcmd processes left on the host. Our own child is killed
/// by handle first; this catches helper processes steamcmd forks that we
/// have no handle for.
#[cfg(windows)]
fn kill_stray_steamcmd() {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/IM", "steamcmd.exe"])
        .output();
}

#[cfg(not(windows))]
fn kill_stray_steamcmd() {
    let _ = std::process::Command::new("pkill")
        .args(["-f", "steamcmd"])
        .output();
}

/// Record outcomes for a chunk that never ran (script write failure).
fn record_chunk(
    state: &RunState,
    layout: &Layout,
    chunk: &[String],
    index: usize,
    timed_out: bool,
) {
    reconcile(state, layout, chunk, index, timed_out, &ParsedLog::default());
}

/// Reconcile the classified log against the filesystem, item by item.
/// Files present in the shared tree win over anything the log claims;
/// a logged Success without files is downgraded to `ValidationFailed`.
fn reconcile(
    state: &RunState,
    layout: &Layout,
    chunk: &[String],
    index: usize,
    timed_out: bool,
    parsed: &ParsedLog,
) {
    for id in chunk {
        let mut outcome = parsed
            .per_item
            .get(id)
            .copied()
            .unwrap_or(Outcome::Unknown);

        let src = layout.instance_item_dir(index, id);
        let dst = layout.shared_item_dir(id);

        let in_shared = if fsutil::has_files(&dst) {
            // Already present from an earlier pass; drop the duplicate the
            // instance may have produced so the install tree ends up empty.
            if src.exists() {
                let _ = fs::remove_dir_all(&src);
            }
            true
        } else if fsutil::has_files(&src) {
            fsutil::move_dir(&src, &dst)
        } else {
            false
        };

        if in_shared {
            outcome = Outcome::Success;
        } else if outcome == Outcome::Success {
            warn!(
                "[t{index}] steamcmd reported Success for {id} but no files \
                 materialised - treating as ValidationFailed"
            );
            outcome = Outcome::ValidationFailed;
        }

        // A hard timeout overrides anything that is not already a success.
        if timed_out && outcome != Outcome::Success {
            outcome = Outcome::Timeout;
        }

        state.record(id, outcome);
    }
}
