//! Staging cleanup.
//!
//! steamcmd keeps partial downloads in a handful of staging subdirs and
//! drops `.patch`/`.lock` state files next to them. Stale leftovers are
//! what produce "Staged file validation failed" and "Locking Failed" on
//! the next run, so both the per-instance staging dirs and the shared
//! lock files get wiped before every pass. Cleanup failures are warnings,
//! never errors.

use crate::config::STAGING_SUBDIRS;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Empty every staging subdir inside one instance install dir.
/// Missing subdirs are fine. Returns the number of entries removed.
pub fn clean_instance_staging(instance_dir: &Path) -> usize {
    let mut removed = 0;
    for sub in STAGING_SUBDIRS {
        let dir = instance_dir.join(sub);
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let res = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match res {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not clean staging entry {}: {}", path.display(), e),
            }
        }
    }
    removed
}

/// Remove stale `.patch` and `.lock` files from the shared workshop
/// downloads dir. These are leftover locks that block parallel instances.
pub fn clean_shared_locks(shared_downloads: &Path) -> usize {
    let mut removed = 0;
    let Ok(entries) = fs::read_dir(shared_downloads) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_lock = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("patch") | Some("lock")
        );
        if !is_lock {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not remove lock file {}: {}", path.display(), e),
        }
    }
    removed
}
