//! Best-effort metadata inferred from a source file's path.

use std::path::Path;

use hazard_map_database_models::{SourceInfo, SourceKind};

/// City names recognized in file stems.
const KNOWN_CITIES: &[&str] = &["istanbul", "ankara", "izmir"];

/// Infers source metadata from a path. Never fails; anything that cannot
/// be inferred is left empty.
#[must_use]
pub fn source_info(path: &Path) -> SourceInfo {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    let year = path
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .find(|part| part.len() == 4 && part.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|part| part.parse().ok());

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let city = KNOWN_CITIES
        .iter()
        .find(|city| stem.contains(*city))
        .map(|city| (*city).to_string());

    let kind = if stem.contains("prediction") {
        SourceKind::Prediction
    } else if stem.contains("final") {
        SourceKind::Final
    } else {
        SourceKind::Current
    };

    SourceInfo {
        filename,
        year,
        city,
        kind,
    }
}
