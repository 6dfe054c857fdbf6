//! `appworkshop_252490.acf` patcher.
//!
//! The ACF manifest is Valve's brace-and-quote text format:
//!
//! ```text
//! "AppWorkshop"              depth 0 key
//! {                          depth 1 opens
//!     "appid"  "252490"
//!     "WorkshopItemsInstalled"
//!     {                      depth 2 opens
//!         "490678544"        item id
//!         { ... }
//!     }                      depth 2 closes  <- insert point
//!     "WorkshopItemDetails"
//!     { ... }                depth 2 closes  <- insert point
//! }
//! ```
//!
//! This is not a general VDF reader. The parser tracks absolute brace
//! depth line by line, records which item ids each section already holds,
//! and remembers the line index of each section's closing brace. New
//! entries are spliced in front of those closers; every line the patcher
//! does not insert is written back byte-for-byte (modulo CRLF -> LF
//! normalisation on ingest).
//!
//! `"manifest" "0"` is deliberate: it makes Steam refetch the real
//! manifest hash on next launch without re-downloading files already on
//! disk.

pub mod scan;

use crate::config::{is_all_digits, looks_like_steam_path, APP_ID};
use anyhow::{bail, Context, Result};
use chrono::Local;
use self::scan::{scan_content_dir, SkinInfo};
use std::collections::HashSet;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub content_dir: PathBuf,
    pub acf_path: PathBuf,
    /// Answer yes to every confirmation prompt.
    pub assume_yes: bool,
}

/// What the parser learned about an ACF file.
#[derive(Debug, Default)]
pub struct AcfIndex {
    pub installed_ids: HashSet<String>,
    pub details_ids: HashSet<String>,
    /// Line index of the `WorkshopItemsInstalled` closing brace.
    pub installed_close: Option<usize>,
    /// Line index of the `WorkshopItemDetails` closing brace.
    pub details_close: Option<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Installed,
    Details,
    Other,
}

/// Content of the first double-quoted token on a line, if any.
fn first_quoted(line: &str) -> Option<&str> {
    let rest = &line[line.find('"')? + 1..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Single pass over the manifest lines tracking absolute brace depth.
pub fn parse_acf(lines: &[String]) -> AcfIndex {
    let mut index = AcfIndex::default();
    let mut section = Section::None;
    let mut depth = 0usize;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if line == "{" {
            depth += 1;
            continue;
        }
        if line == "}" {
            // A closing brace at depth 2 ends a section block; its line
            // index is where new entries get inserted.
            if depth == 2 {
                match section {
                    Section::Installed => index.installed_close = Some(i),
                    Section::Details => index.details_close = Some(i),
                    _ => {}
                }
                section = Section::None;
            }
            depth = depth.saturating_sub(1);
            continue;
        }

        if !line.starts_with('"') {
            continue;
        }
        let Some(key) = first_quoted(line) else {
            continue;
        };

        match depth {
            // Root block: section name keys
            1 => {
                section = match key {
                    "WorkshopItemsInstalled" => Section::Installed,
                    "WorkshopItemDetails" => Section::Details,
                    _ => Section::Other,
                };
            }
            // Inside a section: item id lines are purely numeric
            2 => {
                if is_all_digits(key) {
                    match section {
                        Section::Installed => {
                            index.installed_ids.insert(key.to_string());
                        }
                        Section::Details => {
                            index.details_ids.insert(key.to_string());
                        }
                        _ => {}
                    }
                }
            }
            // Depth >= 3: key-value pairs inside item blocks - not needed
            _ => {}
        }
    }
    index
}

/// Read the manifest in binary mode, splitting on LF and stripping a
/// trailing CR per line so CRLF input round-trips as LF.
pub fn read_acf_lines(path: &Path) -> Result<Vec<String>> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot open {} for reading", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    Ok(lines)
}

fn build_installed_entry(s: &SkinInfo) -> Vec<String> {
    vec![
        format!("\t\t\"{}\"", s.id),
        "\t\t{".to_string(),
        format!("\t\t\t\"size\"\t\t\"{}\"", s.size),
        format!("\t\t\t\"timeupdated\"\t\t\"{}\"", s.timeupdated),
        "\t\t\t\"manifest\"\t\t\"0\"".to_string(),
        "\t\t}".to_string(),
    ]
}

fn build_details_entry(s: &SkinInfo) -> Vec<String> {
    vec![
        format!("\t\t\"{}\"", s.id),
        "\t\t{".to_string(),
        "\t\t\t\"manifest\"\t\t\"0\"".to_string(),
        format!("\t\t\t\"timeupdated\"\t\t\"{}\"", s.timeupdated),
        format!("\t\t\t\"timetouched\"\t\t\"{}\"", s.timetouched),
        format!("\t\t\t\"latest_timeupdated\"\t\t\"{}\"", s.timeupdated),
        "\t\t\t\"latest_manifest\"\t\t\"0\"".to_string(),
        "\t\t}".to_string(),
    ]
}

/// Build both insertion buffers (each item goes only into the section it
/// is missing from) and splice them in front of the section closers.
/// Inserting at the higher index first leaves the lower one valid.
pub fn apply(lines: &mut Vec<String>, index: &AcfIndex, to_add: &[SkinInfo]) -> Result<()> {
    let (Some(installed_close), Some(details_close)) =
        (index.installed_close, index.details_close)
    else {
        bail!("Missing section close index");
    };

    let mut installed_buf = Vec::new();
    let mut details_buf = Vec::new();
    for s in to_add {
        if !index.installed_ids.contains(&s.id) {
            installed_buf.extend(build_installed_entry(s));
        }
        if !index.details_ids.contains(&s.id) {
            details_buf.extend(build_details_entry(s));
        }
    }

    let mut inserts = [
        (installed_close, installed_buf),
        (details_close, details_buf),
    ];
    inserts.sort_by(|a, b| b.0.cmp(&a.0));
    for (at, buf) in inserts {
        lines.splice(at..at, buf);
    }
    Ok(())
}

/// Copy the manifest to a timestamped sibling before touching it.
fn backup_acf(acf_path: &Path) -> Result<PathBuf> {
    let stem = acf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "appworkshop".to_string());
    let name = format!(
        "{stem}_backup_{}.acf",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let backup = acf_path.with_file_name(name);
    fs::copy(acf_path, &backup)
        .with_context(|| format!("Failed to back up to {}", backup.display()))?;
    Ok(backup)
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt} (y/n): ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y")
}

/// Independently invokable patcher entry point.
pub fn run(opts: &PatchOptions) -> Result<()> {
    println!("Content folder : {}", opts.content_dir.display());
    println!("ACF file       : {}", opts.acf_path.display());

    if !opts.content_dir.exists() {
        bail!("Content folder not found: {}", opts.content_dir.display());
    }
    if !looks_like_steam_path(&opts.content_dir) {
        warn!("Path does not look like a Steam workshop folder");
        println!("WARNING: {} does not look like a Steam workshop folder.", opts.content_dir.display());
        if !opts.assume_yes && !confirm("Continue anyway?") {
            bail!("Aborted");
        }
    }
    if opts.content_dir.file_name().and_then(|n| n.to_str()) != Some(APP_ID) {
        println!(
            "WARNING: folder name does not match App ID {APP_ID}: {}",
            opts.content_dir.display()
        );
        if !opts.assume_yes && !confirm("Continue anyway?") {
            bail!("Aborted");
        }
    }

    if !opts.acf_path.exists() {
        bail!("ACF file not found: {}", opts.acf_path.display());
    }
    if opts.acf_path.extension().and_then(|e| e.to_str()) != Some("acf") {
        println!("WARNING: {} does not have an .acf extension.", opts.acf_path.display());
        if !opts.assume_yes && !confirm("Continue anyway?") {
            bail!("Aborted");
        }
    }

    let mut lines = read_acf_lines(&opts.acf_path)?;
    println!("ACF loaded: {} lines.", lines.len());

    let index = parse_acf(&lines);
    if index.installed_close.is_none() || index.details_close.is_none() {
        println!("Could not locate the WorkshopItemsInstalled / WorkshopItemDetails sections.");
        println!("First {} lines of the file:", lines.len().min(30));
        for (i, line) in lines.iter().take(30).enumerate() {
            println!("  L{i}: {line}");
        }
        bail!("Unrecognised ACF structure in {}", opts.acf_path.display());
    }
    println!(
        "Existing entries: installed={} details={}",
        index.installed_ids.len(),
        index.details_ids.len()
    );

    let scanned = scan_content_dir(&opts.content_dir, &index.installed_ids, &index.details_ids)?;
    println!("Already in ACF (skipping) : {}", scanned.already_present);
    println!("Empty folders (skipping)  : {}", scanned.empty);
    println!("Missing - will add        : {}", scanned.to_add.len());

    if scanned.to_add.is_empty() {
        println!("ACF is already up to date. Nothing to write.");
        return Ok(());
    }

    println!("\nFirst up to 5 skins to be added:");
    for s in scanned.to_add.iter().take(5) {
        println!("  {}  size={}  timeupdated={}", s.id, s.size, s.timeupdated);
    }
    if scanned.to_add.len() > 5 {
        println!("  ... and {} more.", scanned.to_add.len() - 5);
    }

    if !opts.assume_yes && !confirm("Proceed with patching the .acf file?") {
        println!("Aborted by user.");
        return Ok(());
    }

    match backup_acf(&opts.acf_path) {
        Ok(backup) => println!("Backup created: {}", backup.display()),
        Err(e) => {
            warn!("{e:#}");
            println!("Backup failed: {e:#}");
            if !opts.assume_yes && !confirm("Continue without backup?") {
                bail!("Aborted");
            }
        }
    }

    apply(&mut lines, &index, &scanned.to_add)?;

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(&opts.acf_path, out).with_context(|| {
        format!(
            "Cannot open {} for writing - is Steam running? Close it before patching",
            opts.acf_path.display()
        )
    })?;

    info!(
        "ACF patched: added={} present={} empty={}",
        scanned.to_add.len(),
        scanned.already_present,
        scanned.empty
    );
    println!("ACF patched successfully. Skins added: {}", scanned.to_add.len());
    println!("On next Steam launch the real manifest hashes are fetched without re-downloading.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_acf() -> Vec<String> {
        [
            "\"AppWorkshop\"",
            "{",
            "\t\"appid\"\t\t\"252490\"",
            "\t\"SizeOnDisk\"\t\t\"123456\"",
            "\t\"WorkshopItemsInstalled\"",
            "\t{",
            "\t\t\"111\"",
            "\t\t{",
            "\t\t\t\"size\"\t\t\"100\"",
            "\t\t\t\"timeupdated\"\t\t\"1700000000\"",
            "\t\t\t\"manifest\"\t\t\"0\"",
            "\t\t}",
            "\t}",
            "\t\"WorkshopItemDetails\"",
            "\t{",
            "\t\t\"111\"",
            "\t\t{",
            "\t\t\t\"manifest\"\t\t\"0\"",
            "\t\t}",
            "\t\t\"222\"",
            "\t\t{",
            "\t\t\t\"manifest\"\t\t\"0\"",
            "\t\t}",
            "\t}",
            "}",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn skin(id: &str) -> SkinInfo {
        SkinInfo {
            id: id.to_string(),
            size: 500,
            timeupdated: 1_800_000_000,
            timetouched: 1_900_000_000,
        }
    }

    #[test]
    fn test_first_quoted() {
        assert_eq!(first_quoted("\t\"WorkshopItemsInstalled\""), Some("WorkshopItemsInstalled"));
        assert_eq!(first_quoted("\t\t\t\"size\"\t\t\"2615900\""), Some("size"));
        assert_eq!(first_quoted("no quotes here"), None);
        assert_eq!(first_quoted("\"unterminated"), None);
    }

    #[test]
    fn test_parse_acf_sections_and_close_indices() {
        let lines = sample_acf();
        let index = parse_acf(&lines);

        assert_eq!(index.installed_ids, HashSet::from(["111".to_string()]));
        assert_eq!(
            index.details_ids,
            HashSet::from(["111".to_string(), "222".to_string()])
        );
        // Closing braces of the two sections
        assert_eq!(index.installed_close, Some(12));
        assert_eq!(index.details_close, Some(23));
        assert_eq!(lines[12].trim(), "}");
        assert_eq!(lines[23].trim(), "}");
    }

    #[test]
    fn test_parse_acf_kv_inside_items_not_recorded() {
        let lines = sample_acf();
        let index = parse_acf(&lines);
        // "size"/"timeupdated" at depth 3 must not leak into the id sets,
        // and numeric values like "100" must not either.
        assert!(!index.installed_ids.contains("100"));
        assert!(!index.installed_ids.contains("1700000000"));
    }

    #[test]
    fn test_apply_inserts_only_missing_sections() {
        let mut lines = sample_acf();
        let original = lines.clone();
        let index = parse_acf(&lines);

        // 222 already sits in details; 333 is new everywhere
        let to_add = vec![skin("222"), skin("333")];
        apply(&mut lines, &index, &to_add).unwrap();

        let text = lines.join("\n");
        // 222 gains an installed entry only: one id line added
        assert_eq!(text.matches("\t\t\"222\"").count(), 2);
        // 333 appears in both sections
        assert_eq!(text.matches("\t\t\"333\"").count(), 2);

        // Every original line survives untouched and in order
        let mut it = lines.iter();
        for orig in &original {
            assert!(
                it.any(|l| l == orig),
                "original line lost or reordered: {orig}"
            );
        }

        // Installed entry for 333 carries size + timeupdated + sentinel
        let installed_start = lines
            .iter()
            .position(|l| l == "\t\t\"333\"")
            .unwrap();
        assert_eq!(lines[installed_start + 2], "\t\t\t\"size\"\t\t\"500\"");
        assert_eq!(
            lines[installed_start + 3],
            "\t\t\t\"timeupdated\"\t\t\"1800000000\""
        );
        assert_eq!(lines[installed_start + 4], "\t\t\t\"manifest\"\t\t\"0\"");

        // Details entry carries the full five keys
        assert!(text.contains("\t\t\t\"timetouched\"\t\t\"1900000000\""));
        assert!(text.contains("\t\t\t\"latest_timeupdated\"\t\t\"1800000000\""));
        assert!(text.contains("\t\t\t\"latest_manifest\"\t\t\"0\""));

        // The patched file still parses, with the new ids in place
        let reparsed = parse_acf(&lines);
        assert!(reparsed.installed_ids.contains("222"));
        assert!(reparsed.installed_ids.contains("333"));
        assert!(reparsed.details_ids.contains("333"));
    }

    #[test]
    fn test_apply_without_close_index_refuses() {
        let mut lines = vec!["\"AppWorkshop\"".to_string(), "{".to_string(), "}".to_string()];
        let index = parse_acf(&lines);
        assert!(apply(&mut lines, &index, &[skin("333")]).is_err());
    }

    #[test]
    fn test_read_acf_lines_strips_cr() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("appworkshop_252490.acf");
        fs::write(&p, b"\"AppWorkshop\"\r\n{\r\n}\r\n").unwrap();
        let lines = read_acf_lines(&p).unwrap();
        assert_eq!(lines, vec!["\"AppWorkshop\"", "{", "}"]);
    }

    #[test]
    fn test_read_acf_lines_no_trailing_newline() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("a.acf");
        fs::write(&p, b"\"AppWorkshop\"\n{\n}").unwrap();
        let lines = read_acf_lines(&p).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "}");
    }

    #[test]
    fn test_run_end_to_end_and_idempotent() {
        let dir = tempdir().unwrap();

        // Shared content tree with three items on disk
        let content = dir.path().join("steamapps/workshop/content/252490");
        for id in ["111", "222", "333"] {
            let item = content.join(id);
            fs::create_dir_all(&item).unwrap();
            fs::write(item.join("skin.bin"), b"data").unwrap();
        }

        let acf_path = dir.path().join("steamapps/workshop/appworkshop_252490.acf");
        let mut initial = sample_acf().join("\n");
        initial.push('\n');
        fs::write(&acf_path, &initial).unwrap();

        let opts = PatchOptions {
            content_dir: content.clone(),
            acf_path: acf_path.clone(),
            assume_yes: true,
        };

        run(&opts).unwrap();

        let patched = fs::read_to_string(&acf_path).unwrap();
        assert!(patched.contains("\t\t\"333\""));
        // 111 was complete already: untouched, still exactly one pair of
        // occurrences (one per section)
        assert_eq!(patched.matches("\t\t\"111\"").count(), 2);

        // A backup sibling was written with the original bytes
        let backup = fs::read_dir(acf_path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().contains("_backup_"))
            .expect("backup file");
        assert_eq!(fs::read_to_string(backup.path()).unwrap(), initial);

        // Second run: nothing missing, file byte-identical
        run(&opts).unwrap();
        assert_eq!(fs::read_to_string(&acf_path).unwrap(), patched);
    }
}
