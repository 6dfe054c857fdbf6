//! Content-tree scan for the manifest patcher.
//!
//! Each downloaded item directory yields the values the ACF entry needs:
//! the real on-disk byte size, a `timeupdated` taken from the item's own
//! `manifest.txt` publish date when one exists (newest file mtime
//! otherwise), and `timetouched` as plain wall-clock now - Steam rewrites
//! it on next launch anyway.

use crate::config::is_all_digits;
use crate::fsutil;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Metadata for one item entry to be inserted.
#[derive(Debug, Clone)]
pub struct SkinInfo {
    pub id: String,
    pub size: u64,
    pub timeupdated: i64,
    pub timetouched: i64,
}

impl SkinInfo {
    /// Read one item directory. Never fails: sizes degrade to partial
    /// sums and a missing/unparseable manifest falls back to file mtimes.
    pub fn read(dir: &Path) -> SkinInfo {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let timeupdated =
            manifest_publish_date(dir).unwrap_or_else(|| fsutil::newest_mtime(dir));
        SkinInfo {
            id,
            size: fsutil::total_size(dir),
            timeupdated,
            timetouched: Utc::now().timestamp(),
        }
    }
}

/// Pull the publish date out of `<dir>/manifest.txt`.
/// Pattern: `"PublishDate": "2025-02-04T12:09:39.8009705Z"`.
fn manifest_publish_date(dir: &Path) -> Option<i64> {
    let text = fs::read_to_string(dir.join("manifest.txt")).ok()?;
    let re = Regex::new(r#""PublishDate"\s*:\s*"([^"]+)""#).unwrap();
    for line in text.lines() {
        if let Some(m) = re.captures(line) {
            return parse_iso_utc(&m[1]);
        }
    }
    None
}

/// Parse the date-time prefix of an ISO-8601 string as UTC seconds.
/// Fractional seconds and the zone suffix are ignored.
pub fn parse_iso_utc(s: &str) -> Option<i64> {
    let re = Regex::new(r"(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})").unwrap();
    let m = re.captures(s)?;
    let field = |i: usize| m[i].parse::<u32>().ok();
    let dt = Utc
        .with_ymd_and_hms(
            m[1].parse::<i32>().ok()?,
            field(2)?,
            field(3)?,
            field(4)?,
            field(5)?,
            field(6)?,
        )
        .single()?;
    Some(dt.timestamp())
}

/// Result of scanning the shared content tree against the parsed ACF.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Items on disk missing from at least one section, in id order.
    pub to_add: Vec<SkinInfo>,
    /// Items already present in both sections.
    pub already_present: usize,
    /// All-digit directories with no files (skipped).
    pub empty: usize,
}

/// Walk the immediate children of the content dir and decide which item
/// entries the manifest is missing.
pub fn scan_content_dir(
    content_dir: &Path,
    installed_ids: &HashSet<String>,
    details_ids: &HashSet<String>,
) -> Result<ScanResult> {
    let mut dirs: Vec<_> = fs::read_dir(content_dir)
        .with_context(|| format!("Failed to scan {}", content_dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect();
    dirs.sort();

    let mut result = ScanResult::default();
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_all_digits(&name) {
            continue;
        }

        if !fsutil::has_files(&dir) {
            result.empty += 1;
            println!("SKIP empty : {name}");
            continue;
        }

        if installed_ids.contains(&name) && details_ids.contains(&name) {
            result.already_present += 1;
            debug!("PRESENT {name}");
            continue;
        }

        let info = SkinInfo::read(&dir);
        debug!(
            "QUEUE {} size={} timeupdated={}",
            info.id, info.size, info.timeupdated
        );
        result.to_add.push(info);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_iso_utc() {
        let t = parse_iso_utc("2025-02-04T12:09:39.8009705Z").unwrap();
        let expected = Utc
            .with_ymd_and_hms(2025, 2, 4, 12, 9, 39)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(t, expected);

        assert!(parse_iso_utc("not a date").is_none());
        assert!(parse_iso_utc("2025-13-04T12:09:39Z").is_none());
    }

    #[test]
    fn test_skininfo_from_manifest_date() {
        let dir = tempdir().unwrap();
        let item = dir.path().join("490217825");
        fs::create_dir(&item).unwrap();
        fs::write(item.join("skin.png"), vec![0u8; 1234]).unwrap();
        fs::write(
            item.join("manifest.txt"),
            "{\n  \"PublishDate\": \"2025-02-04T12:09:39.8009705Z\"\n}\n",
        )
        .unwrap();

        let info = SkinInfo::read(&item);
        assert_eq!(info.id, "490217825");
        // manifest.txt itself counts towards the size sum
        assert!(info.size > 1234);
        let expected = Utc
            .with_ymd_and_hms(2025, 2, 4, 12, 9, 39)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(info.timeupdated, expected);
        assert!(info.timetouched > 0);
    }

    #[test]
    fn test_skininfo_falls_back_to_mtime() {
        let dir = tempdir().unwrap();
        let item = dir.path().join("111111");
        fs::create_dir(&item).unwrap();
        fs::write(item.join("skin.png"), b"data").unwrap();

        let info = SkinInfo::read(&item);
        assert_eq!(info.timeupdated, fsutil::newest_mtime(&item));
        assert!(info.timeupdated > 0);
    }

    #[test]
    fn test_scan_content_dir() {
        let dir = tempdir().unwrap();

        for (name, with_files) in [
            ("111111", true),
            ("222222", true),
            ("333333", true),
            ("444444", false), // empty
            ("notanid", true),
        ] {
            let item = dir.path().join(name);
            fs::create_dir(&item).unwrap();
            if with_files {
                fs::write(item.join("f.bin"), b"x").unwrap();
            }
        }

        let installed: HashSet<String> = ["111111"].iter().map(|s| s.to_string()).collect();
        let details: HashSet<String> =
            ["111111", "222222"].iter().map(|s| s.to_string()).collect();

        let result = scan_content_dir(dir.path(), &installed, &details).unwrap();
        let ids: Vec<&str> = result.to_add.iter().map(|s| s.id.as_str()).collect();
        // 111111 is in both sections, 222222 misses installed, 333333 misses both
        assert_eq!(ids, vec!["222222", "333333"]);
        assert_eq!(result.already_present, 1);
        assert_eq!(result.empty, 1);
    }

    #[test]
    fn test_scan_missing_dir_is_error() {
        let dir = tempdir().unwrap();
        let installed = HashSet::new();
        let details = HashSet::new();
        assert!(scan_content_dir(&dir.path().join("nope"), &installed, &details).is_err());
    }
}
