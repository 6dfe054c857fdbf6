//! Concurrent download orchestration.
//!
//! A run is a sequence of passes. Each pass partitions the working set
//! across N isolated steamcmd instances, waits for all of them, and feeds
//! whatever failed into the retry controller, which wipes staging state,
//! backs off after rate limits, halves the concurrency and dispatches the
//! next pass until nothing retriable remains or the pass budget runs out.

pub mod logparse;
pub mod script;
pub mod state;
pub mod worker;

use crate::config::{Layout, MAX_RETRY_PASSES, RATELIMIT_BACKOFF_SEC, STATUS_POLL_MS};
use crate::{fsutil, ids, report, staging};
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use self::state::{Outcome, RunState};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Knobs collected from flags or interactive prompts before a run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Max parallel steamcmd instances for the first pass.
    pub instances: usize,
    /// Skip ids whose shared-tree directory already holds files.
    pub skip_existing: bool,
    /// Restrict the run to the ids recorded in `failed_ids.txt`.
    pub retry_failed_only: bool,
}

/// Whole-run entry point: pre-flight, work-set construction, passes,
/// summary, report. Per-item failures do not make this an `Err`; only
/// missing prerequisites do.
pub async fn run(layout: Layout, opts: DownloadOptions) -> Result<()> {
    preflight(&layout)?;
    prepare_dirs(&layout)?;

    let input = layout.input_file();
    let all_ids = ids::parse_ids(&input)?;
    if all_ids.is_empty() {
        bail!("No workshop ids found in {}", input.display());
    }
    println!("Loaded {} unique skin ids.", all_ids.len());
    info!(
        "=== Session start | total={} instances={} ===",
        all_ids.len(),
        opts.instances
    );

    let prev_failed: HashSet<String> = if opts.retry_failed_only {
        read_failed_ids(&layout)
    } else {
        HashSet::new()
    };

    let state = Arc::new(RunState::new());
    let mut to_process = Vec::new();
    for id in &all_ids {
        if opts.retry_failed_only && !prev_failed.contains(id) {
            state.mark_skipped(id);
            continue;
        }
        if opts.skip_existing && fsutil::has_files(&layout.shared_item_dir(id)) {
            state.mark_skipped(id);
            continue;
        }
        to_process.push(id.clone());
    }

    let skipped = state.counters.skipped.load(Ordering::Relaxed);
    if to_process.is_empty() {
        println!("Nothing to download. Skipped: {skipped}");
        info!("=== Session end | nothing to do | skipped={skipped} ===");
        return Ok(());
    }
    println!(
        "Skins to download: {}  |  Already present (skipped): {}",
        to_process.len(),
        skipped
    );

    let session_start = Instant::now();
    run_passes(&layout, &state, &to_process, opts.instances).await;

    print_summary(&layout, &state, session_start.elapsed());
    report::write_report(&layout, &all_ids, &state)?;
    info!(
        "=== Session end | success={} failed={} time={}s ===",
        state.counters.success.load(Ordering::Relaxed),
        state.counters.failed.load(Ordering::Relaxed),
        session_start.elapsed().as_secs()
    );
    Ok(())
}

/// Pass 1 plus the retry loop. Factored out of [`run`] so tests can drive
/// a work set without the interactive surface around it.
pub async fn run_passes(
    layout: &Layout,
    state: &Arc<RunState>,
    work: &[String],
    instances: usize,
) {
    let layout = Arc::new(layout.clone());
    let grand_total = work.len();

    run_pass(&layout, state, work, instances, 1, grand_total).await;

    let mut concurrency = instances;
    for retry in 1..=MAX_RETRY_PASSES {
        let failed = state.collect_failed(work);
        if failed.is_empty() {
            println!("All items succeeded - no retries needed.");
            return;
        }

        let vf = state.count_with(&failed, Outcome::ValidationFailed);
        let lk = state.count_with(&failed, Outcome::LockFailed);
        println!(
            "Retry pass {retry}/{MAX_RETRY_PASSES}: {} item(s)  [VF={vf} LK={lk}]",
            failed.len()
        );
        info!(
            "Retry pass {retry}/{MAX_RETRY_PASSES}: {} item(s) [VF={vf} LK={lk}]",
            failed.len()
        );

        // Fresh staging everywhere before the retry: stale partial files
        // are the main source of ValidationFailed loops.
        for i in 0..instances {
            staging::clean_instance_staging(&layout.instance_dir(i));
        }
        staging::clean_shared_locks(&layout.shared_downloads_dir());

        if state.any_rate_limit.swap(false, Ordering::Relaxed) {
            let backoff = 2 * RATELIMIT_BACKOFF_SEC;
            println!("Rate limit detected; sleeping {backoff}s before the retry...");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }

        state.reset_for_retry(&failed);

        // Fewer instances lower both lock contention and rate-limit pressure.
        concurrency = (concurrency / 2).max(1);
        run_pass(&layout, state, &failed, concurrency, retry + 1, grand_total).await;
    }
}

/// One parallel dispatch: partition, clean shared locks, spawn a worker
/// per chunk plus the progress display task, join everything.
async fn run_pass(
    layout: &Arc<Layout>,
    state: &Arc<RunState>,
    work: &[String],
    instances: usize,
    pass: usize,
    grand_total: usize,
) {
    if work.is_empty() {
        return;
    }
    let n = instances.min(work.len()).max(1);
    let chunks = partition(work, n);

    println!(
        "Pass {pass}/{}: {} skin(s) across {n} isolated steamcmd instance(s).",
        MAX_RETRY_PASSES + 1,
        work.len()
    );
    info!(
        "Pass {pass}/{}: {} skin(s) across {n} instance(s)",
        MAX_RETRY_PASSES + 1,
        work.len()
    );

    // Leftover shared locks from a previous run block everyone.
    staging::clean_shared_locks(&layout.shared_downloads_dir());

    let pb = ProgressBar::new(grand_total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [Pass {prefix}] [{bar:28.cyan/blue}] {pos}/{len} ({percent}%) | {msg}",
            )
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.set_prefix(format!("{pass}/{}", MAX_RETRY_PASSES + 1));

    let done = Arc::new(AtomicBool::new(false));
    let progress = tokio::spawn(progress_loop(
        pb.clone(),
        Arc::clone(state),
        Arc::clone(&done),
    ));

    let mut handles = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.into_iter().enumerate() {
        handles.push(tokio::spawn(worker::run_instance(
            Arc::clone(layout),
            Arc::clone(state),
            chunk,
            i,
            pass,
        )));
    }
    for h in handles {
        if let Err(e) = h.await {
            warn!("Worker task panicked: {e}");
        }
    }

    done.store(true, Ordering::Relaxed);
    let _ = progress.await;
}

/// Display task: refresh the bar from the shared counters every tick.
/// Reads are lock-free; slightly stale numbers are fine for display.
async fn progress_loop(pb: ProgressBar, state: Arc<RunState>, done: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(STATUS_POLL_MS));
    loop {
        interval.tick().await;
        update_bar(&pb, &state);
        if done.load(Ordering::Relaxed) {
            break;
        }
    }
    update_bar(&pb, &state);
    pb.finish_and_clear();
}

fn update_bar(pb: &ProgressBar, state: &RunState) {
    let c = &state.counters;
    pb.set_position(c.processed.load(Ordering::Relaxed) as u64);
    pb.set_message(format!(
        "OK:{} Skip:{} Fail:{} (T:{} E:{} RL:{} LK:{} VF:{})",
        c.success.load(Ordering::Relaxed),
        c.skipped.load(Ordering::Relaxed),
        c.failed.load(Ordering::Relaxed),
        c.timeout.load(Ordering::Relaxed),
        c.error.load(Ordering::Relaxed),
        c.rate_limit.load(Ordering::Relaxed),
        c.lock_failed.load(Ordering::Relaxed),
        c.validation_failed.load(Ordering::Relaxed),
    ));
}

/// Split the working set into `n` ordered chunks whose sizes differ by at
/// most one, remainder spread over the leading chunks.
pub fn partition(ids: &[String], n: usize) -> Vec<Vec<String>> {
    if ids.is_empty() || n == 0 {
        return Vec::new();
    }
    let n = n.min(ids.len());
    let base = ids.len() / n;
    let rem = ids.len() % n;

    let mut chunks = Vec::with_capacity(n);
    let mut idx = 0;
    for i in 0..n {
        let size = base + usize::from(i < rem);
        chunks.push(ids[idx..idx + size].to_vec());
        idx += size;
    }
    chunks
}

fn preflight(layout: &Layout) -> Result<()> {
    let steamcmd = layout.steamcmd();
    if !steamcmd.exists() {
        bail!(
            "steamcmd not found at {} - place the steamcmd binary next to this tool",
            steamcmd.display()
        );
    }
    let input = layout.input_file();
    if !input.exists() {
        bail!("Input file {} not found", input.display());
    }
    Ok(())
}

/// Create the output tree and reset the transient script area.
fn prepare_dirs(layout: &Layout) -> Result<()> {
    fs::create_dir_all(layout.log_dir())
        .with_context(|| format!("Failed to create {}", layout.log_dir().display()))?;
    fs::create_dir_all(layout.content_dir())
        .with_context(|| format!("Failed to create {}", layout.content_dir().display()))?;
    let temp = layout.temp_dir();
    if temp.exists() {
        let _ = fs::remove_dir_all(&temp);
    }
    fs::create_dir_all(&temp)
        .with_context(|| format!("Failed to create {}", temp.display()))?;
    Ok(())
}

fn read_failed_ids(layout: &Layout) -> HashSet<String> {
    match fs::read_to_string(layout.failed_ids_file()) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => HashSet::new(),
    }
}

fn print_summary(layout: &Layout, state: &RunState, elapsed: Duration) {
    let c = &state.counters;
    let failed = c.failed.load(Ordering::Relaxed);
    println!("\n=== Download Complete ===");
    println!("  Success:             {}", c.success.load(Ordering::Relaxed));
    println!("  Skipped:             {}", c.skipped.load(Ordering::Relaxed));
    println!("  Failed (total):      {failed}");
    println!("    Timeouts:          {}", c.timeout.load(Ordering::Relaxed));
    println!("    Errors:            {}", c.error.load(Ordering::Relaxed));
    println!("    RateLimit:         {}", c.rate_limit.load(Ordering::Relaxed));
    println!("    LockFailed:        {}", c.lock_failed.load(Ordering::Relaxed));
    println!(
        "    ValidationFailed:  {}",
        c.validation_failed.load(Ordering::Relaxed)
    );
    println!(
        "  Total time: {}m {}s",
        elapsed.as_secs() / 60,
        elapsed.as_secs() % 60
    );
    if failed > 0 {
        println!("  Failed ids -> {}", layout.failed_ids_file().display());
    }
    println!("  Report     -> {}", layout.report_file().display());
    println!("  Logs       -> {}", layout.log_dir().display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:06}", 100_000 + i)).collect()
    }

    #[test]
    fn test_partition_even() {
        let chunks = partition(&ids(9), 3);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 3));
    }

    #[test]
    fn test_partition_remainder_spread() {
        let chunks = partition(&ids(10), 3);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);

        // Order preserved and nothing lost
        let flat: Vec<String> = chunks.into_iter().flatten().collect();
        assert_eq!(flat, ids(10));
    }

    #[test]
    fn test_partition_more_instances_than_items() {
        let chunks = partition(&ids(2), 5);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_partition_sizes_differ_by_at_most_one() {
        for total in 1..40 {
            for n in 1..8 {
                let chunks = partition(&ids(total), n);
                let min = chunks.iter().map(|c| c.len()).min().unwrap();
                let max = chunks.iter().map(|c| c.len()).max().unwrap();
                assert!(max - min <= 1, "total={total} n={n}");
                assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), total);
            }
        }
    }

    #[test]
    fn test_partition_empty() {
        assert!(partition(&[], 4).is_empty());
    }

    #[cfg(unix)]
    mod two_pass {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        /// Stub that fails every item with "Locking Failed" on its first
        /// invocation and succeeds (with files) on the second, mirroring a
        /// lock-contention pass followed by a clean retry.
        fn install_flaky_stub(layout: &Layout, item_ids: &[&str]) {
            let mut body = String::from("#!/bin/sh\nif [ -f stub_ran_once ]; then\n");
            for id in item_ids {
                let item = format!(
                    "instances/rust_workshop_t0/steamapps/workshop/content/252490/{id}"
                );
                body.push_str(&format!("mkdir -p {item}\n"));
                body.push_str(&format!("echo data > {item}/skin.bin\n"));
                body.push_str(&format!(
                    "echo \"[AppID 252490] Download item {id} result : OK\"\n"
                ));
            }
            body.push_str("else\ntouch stub_ran_once\n");
            for id in item_ids {
                body.push_str(&format!(
                    "echo \"[AppID 252490] Download item {id} result : Locking Failed\"\n"
                ));
            }
            body.push_str("fi\n");

            let path = layout.steamcmd();
            fs::write(&path, body).unwrap();
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).unwrap();
        }

        #[tokio::test]
        async fn test_lock_failures_converge_on_retry() {
            let dir = tempdir().unwrap();
            let layout = Layout::new(dir.path());
            fs::create_dir_all(layout.log_dir()).unwrap();

            let item_ids = ["111111", "222222"];
            install_flaky_stub(&layout, &item_ids);

            let work: Vec<String> = item_ids.iter().map(|s| s.to_string()).collect();
            let state = Arc::new(RunState::new());

            run_passes(&layout, &state, &work, 1).await;

            for id in &item_ids {
                assert_eq!(state.outcome_of(id), Some(Outcome::Success), "{id}");
                assert!(crate::fsutil::has_files(&layout.shared_item_dir(id)));
            }
            assert_eq!(state.counters.success.load(Ordering::Relaxed), 2);
            assert_eq!(state.counters.failed.load(Ordering::Relaxed), 0);
            // The retry rewound the lock-failure counters
            assert_eq!(state.counters.lock_failed.load(Ordering::Relaxed), 0);
            assert_eq!(state.counters.processed.load(Ordering::Relaxed), 2);
        }
    }
}
