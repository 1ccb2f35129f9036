//! Recursive source file discovery.

use std::path::{Path, PathBuf};

/// Finds every file under `dir` (recursively) whose name ends with
/// `suffix`, sorted by path.
///
/// # Errors
///
/// Returns an I/O error if `dir` or any subdirectory cannot be read.
pub fn discover_files(dir: &Path, suffix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
            {
                found.push(path);
            }
        }
    }

    found.sort();
    log::debug!(
        "Discovered {} {suffix} file(s) under {}",
        found.len(),
        dir.display()
    );

    Ok(found)
}
