//! Canonical file paths for the `DuckDB` data directory.

use std::path::{Path, PathBuf};

/// Returns the `data/` directory path.
///
/// Resolved relative to the workspace root at compile time, falling back
/// to the current directory if the manifest has no grandparent.
#[must_use]
pub fn data_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        .join("data")
}

/// Returns the default feature store `DuckDB` file path.
#[must_use]
pub fn default_db_path() -> PathBuf {
    data_dir().join("hazard_map.duckdb")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
