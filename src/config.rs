//! Embedded configuration and on-disk layout.
//!
//! All paths the orchestrator touches are derived from a single root
//! directory (normally the working directory holding the steamcmd binary),
//! so the whole tree can be pointed elsewhere in tests.

use std::path::{Path, PathBuf};

/// Steam application id every workshop item belongs to (Rust).
pub const APP_ID: &str = "252490";

/// Shared content destination - where skins end up after a successful download.
pub const SHARED_DIR: &str = "rust_workshop";

/// Root folder holding the per-instance install directories.
pub const INSTANCES_ROOT: &str = "instances";

/// Per-instance install dir prefix - the instance index is appended.
pub const INSTANCE_PREFIX: &str = "rust_workshop_t";

pub const LOG_DIR: &str = "logs";
pub const TEMP_DIR: &str = "temp_scripts";
pub const INPUT_FILE: &str = "ImportedSkins.json";
pub const FAILED_IDS_FILE: &str = "failed_ids.txt";
pub const REPORT_FILE: &str = "download_report.txt";

/// Per-item timeout; an instance gets `BASE_TIMEOUT_SEC * chunk.len()` seconds.
pub const BASE_TIMEOUT_SEC: u64 = 90;
/// Progress display refresh interval.
pub const STATUS_POLL_MS: u64 = 500;
/// Extra passes after the initial one.
pub const MAX_RETRY_PASSES: usize = 3;
/// In-worker backoff after a rate limit; the pass boundary doubles it.
pub const RATELIMIT_BACKOFF_SEC: u64 = 30;

/// Subdirs inside an install dir where steamcmd stages partial downloads.
pub const STAGING_SUBDIRS: [&str; 3] = [
    "steamapps/workshop/downloads",
    "steamapps/workshop/temp",
    "steamapps/downloading",
];

/// Path bundle for one run rooted at a working directory.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The steamcmd binary expected next to the orchestrator.
    pub fn steamcmd(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("steamcmd.exe")
        } else {
            self.root.join("steamcmd")
        }
    }

    pub fn input_file(&self) -> PathBuf {
        self.root.join(INPUT_FILE)
    }

    /// Shared content tree: `<root>/rust_workshop/steamapps/workshop/content/<APP_ID>`.
    pub fn content_dir(&self) -> PathBuf {
        self.root
            .join(SHARED_DIR)
            .join("steamapps/workshop/content")
            .join(APP_ID)
    }

    /// Final resting place of one downloaded item.
    pub fn shared_item_dir(&self, id: &str) -> PathBuf {
        self.content_dir().join(id)
    }

    /// Shared staging dir that collects `.patch`/`.lock` leftovers.
    pub fn shared_downloads_dir(&self) -> PathBuf {
        self.root.join(SHARED_DIR).join("steamapps/workshop/downloads")
    }

    /// Isolated install dir for one steamcmd instance.
    pub fn instance_dir(&self, index: usize) -> PathBuf {
        self.root
            .join(INSTANCES_ROOT)
            .join(format!("{INSTANCE_PREFIX}{index}"))
    }

    /// Where a finished download lands inside an instance dir before the move.
    pub fn instance_item_dir(&self, index: usize, id: &str) -> PathBuf {
        self.instance_dir(index)
            .join("steamapps/workshop/content")
            .join(APP_ID)
            .join(id)
    }

    /// The `force_install_dir` argument written into the steamcmd script,
    /// relative to the root so the script stays portable.
    pub fn instance_dir_relative(&self, index: usize) -> String {
        format!("./{INSTANCES_ROOT}/{INSTANCE_PREFIX}{index}")
    }

    pub fn script_dir(&self, index: usize) -> PathBuf {
        self.root.join(TEMP_DIR).join(format!("t{index}"))
    }

    pub fn script_path(&self, index: usize) -> PathBuf {
        self.script_dir(index).join("script.txt")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn main_log(&self) -> PathBuf {
        self.log_dir().join("main.log")
    }

    /// Raw steamcmd output capture for one instance in one pass.
    pub fn instance_log(&self, pass: usize, index: usize) -> PathBuf {
        self.log_dir().join(format!("instance_p{pass}_t{index}.log"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn report_file(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    pub fn failed_ids_file(&self) -> PathBuf {
        self.root.join(FAILED_IDS_FILE)
    }
}

/// True when the string is one or more ASCII digits - workshop ids and
/// instance suffixes are purely numeric.
pub fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Walks up the parent chain looking for `steamapps` and `steam`
/// components - a cheap sanity check that a user-supplied path actually
/// points inside a Steam install.
pub fn looks_like_steam_path(p: &Path) -> bool {
    let mut has_steamapps = false;
    let mut has_steam = false;
    for ancestor in p.ancestors().skip(1).take(8) {
        if let Some(name) = ancestor.file_name() {
            let lower = name.to_string_lossy().to_lowercase();
            if lower == "steamapps" {
                has_steamapps = true;
            }
            if lower == "steam" {
                has_steam = true;
            }
        }
    }
    has_steamapps && has_steam
}
