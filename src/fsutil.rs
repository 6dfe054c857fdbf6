//! Filesystem primitives shared by the orchestrator and the manifest patcher.
//!
//! steamcmd's logs are unreliable, so "does this directory actually hold
//! files" is the authoritative success signal throughout. Every helper here
//! swallows I/O errors: a directory we cannot read counts as empty, a file
//! we cannot stat contributes nothing to a sum.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::WalkDir;

/// True iff `dir` exists, is a directory, and has at least one direct-child
/// regular file of non-zero size. Does not recurse.
pub fn has_files(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        if let Ok(meta) = entry.metadata() {
            if meta.is_file() && meta.len() > 0 {
                return true;
            }
        }
    }
    false
}

/// Recursive byte sum over all regular files under `dir`. Unreadable
/// entries are skipped, so the result may be a partial sum.
pub fn total_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Newest modification time over regular files under `dir`, as seconds
/// since the Unix epoch. 0 when the directory holds no readable files.
pub fn newest_mtime(dir: &Path) -> i64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .filter_map(|m| m.modified().ok())
        .filter_map(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .max()
        .unwrap_or(0)
}

/// Move a directory: create the destination's parent, try an atomic rename,
/// and fall back to recursive copy + source removal when the rename fails
/// (cross-device). Returns whether the destination holds files afterwards.
pub fn move_dir(src: &Path, dst: &Path) -> bool {
    if let Some(parent) = dst.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Could not create {}: {}", parent.display(), e);
            return false;
        }
    }

    if fs::rename(src, dst).is_ok() {
        return has_files(dst);
    }

    if let Err(e) = copy_tree(src, dst) {
        warn!("Could not copy {} to {}: {}", src.display(), dst.display(), e);
        return false;
    }
    if let Err(e) = fs::remove_dir_all(src) {
        warn!("Could not remove {} after copy: {}", src.display(), e);
    }
    has_files(dst)
}

/// Recursive copy of a directory tree, overwriting existing files.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_has_files() {
        let dir = tempdir().unwrap();

        // Empty directory
        assert!(!has_files(dir.path()));

        // Missing directory
        assert!(!has_files(&dir.path().join("nope")));

        // Zero-size file does not count
        File::create(dir.path().join("empty.bin")).unwrap();
        assert!(!has_files(dir.path()));

        // Nested files do not count (no recursion)
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/deep.bin"), b"data").unwrap();
        assert!(!has_files(dir.path()));

        // A direct non-empty file does
        fs::write(dir.path().join("skin.png"), b"data").unwrap();
        assert!(has_files(dir.path()));
    }

    #[test]
    fn test_has_files_on_a_file() {
        let dir = tempdir().unwrap();
        let f = dir.path().join("file.txt");
        fs::write(&f, b"x").unwrap();
        assert!(!has_files(&f));
    }

    #[test]
    fn test_total_size() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.bin"), vec![0u8; 250]).unwrap();
        assert_eq!(total_size(dir.path()), 350);
        assert_eq!(total_size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_newest_mtime() {
        let dir = tempdir().unwrap();
        assert_eq!(newest_mtime(dir.path()), 0);

        let mut f = File::create(dir.path().join("a.bin")).unwrap();
        f.write_all(b"x").unwrap();
        drop(f);

        let t = newest_mtime(dir.path());
        assert!(t > 0);
        // Sanity: within a day of now
        let now = std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!((now - t).abs() < 86_400);
    }

    #[test]
    fn test_move_dir_rename() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("shared/content/42");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("skin.png"), b"pixels").unwrap();

        assert!(move_dir(&src, &dst));
        assert!(has_files(&dst));
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("skin.png")).unwrap(), b"pixels");
    }

    #[test]
    fn test_move_dir_empty_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();

        // Rename succeeds but the destination has no files
        assert!(!move_dir(&src, &dst));
    }

    #[test]
    fn test_copy_tree_nested() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("top.txt"), b"1").unwrap();
        fs::write(src.join("a/b/deep.txt"), b"22").unwrap();

        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read(dst.join("top.txt")).unwrap(), b"1");
        assert_eq!(fs::read(dst.join("a/b/deep.txt")).unwrap(), b"22");
    }
}
