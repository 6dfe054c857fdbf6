//! steamcmd script emission.

use crate::config::{Layout, APP_ID};
use anyhow::{Context, Result};
use std::fs;

/// Write the `+runscript` input for one instance: anonymous login, the
/// isolated install dir, one download command per item, quit. UTF-8 with
/// LF line endings regardless of platform.
pub fn write_script(layout: &Layout, index: usize, chunk: &[String]) -> Result<()> {
    let dir = layout.script_dir(index);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create script dir {}", dir.display()))?;

    let mut script = String::new();
    script.push_str("login anonymous\n");
    script.push_str(&format!(
        "force_install_dir {}\n",
        layout.instance_dir_relative(index)
    ));
    for id in chunk {
        script.push_str(&format!("workshop_download_item {APP_ID} {id}\n"));
    }
    script.push_str("quit\n");

    let path = layout.script_path(index);
    fs::write(&path, script)
        .with_context(|| format!("Failed to write script {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_script_contents() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let chunk = vec!["490217825".to_string(), "3511955902".to_string()];

        write_script(&layout, 0, &chunk).unwrap();

        let text = fs::read_to_string(layout.script_path(0)).unwrap();
        assert_eq!(
            text,
            "login anonymous\n\
             force_install_dir ./instances/rust_workshop_t0\n\
             workshop_download_item 252490 490217825\n\
             workshop_download_item 252490 3511955902\n\
             quit\n"
        );
    }

    #[test]
    fn test_script_empty_chunk() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        write_script(&layout, 3, &[]).unwrap();
        let text = fs::read_to_string(layout.script_path(3)).unwrap();
        assert_eq!(
            text,
            "login anonymous\nforce_install_dir ./instances/rust_workshop_t3\nquit\n"
        );
    }
}
