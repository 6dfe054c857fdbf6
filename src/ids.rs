//! Workshop id extraction from the import file.
//!
//! The input is whatever the skin-import plugin happened to dump - usually
//! JSON-ish, sometimes hand-edited. Instead of parsing it structurally we
//! pull every double-quoted run of 6-12 decimal digits, which is exactly
//! the shape of a workshop item id.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Extract all workshop ids from `path`, deduplicated, in first-seen order.
pub fn parse_ids(path: &Path) -> Result<Vec<String>> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read id file {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let id_re = Regex::new(r#""(\d{6,12})""#).unwrap();

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in text.lines() {
        for cap in id_re.captures_iter(line) {
            let id = &cap[1];
            if seen.insert(id.to_string()) {
                out.push(id.to_string());
            }
        }
    }
    Ok(out)
}
