// src/watch/scan.rs

//! Initial scan used to seed the first run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::watch::path_utils::relative_str;
use crate::watch::patterns::PathFilter;

/// Collect all files under `root` accepted by `filter`, as root-relative,
/// forward-slash paths (sorted).
pub fn collect_matching_files(root: &Path, filter: &PathFilter) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).with_context(|| format!("reading dir {:?}", dir))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Some(rel) = relative_str(root, &path) {
                    if filter.matches(&rel) {
                        files.push(rel);
                    }
                }
            }
        }
    }

    files.sort();
    Ok(files)
}
