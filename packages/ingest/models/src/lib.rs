#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion configuration and result types.

use std::path::PathBuf;
use std::time::Duration;

use hazard_map_database::RetryPolicy;
use hazard_map_database_models::SourceInfo;
use serde::{Deserialize, Serialize};

/// Configuration for file and directory imports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of document elements processed per batch.
    pub batch_size: usize,
    /// Number of parallel store sessions per batch.
    pub workers: usize,
    /// Number of item errors retained in each [`ImportResult`].
    pub error_sample_size: usize,
    /// File name suffix matched by directory discovery.
    pub file_suffix: String,
    /// Backoff for transient persistence errors.
    pub retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            workers: 4,
            error_sample_size: 5,
            file_suffix: ".geojson".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Which stage rejected an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemErrorKind {
    /// The element was not a well-formed feature.
    Structural,
    /// The feature geometry failed validation.
    Geometry,
    /// The store rejected the write.
    Persistence,
}

/// A single document element that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Position of the element in its document.
    pub index: usize,
    /// The element's source id or name, when it has one.
    pub feature_id: Option<String>,
    /// Which stage rejected it.
    pub kind: ItemErrorKind,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.feature_id {
            Some(id) => write!(f, "Feature {id}: {}", self.message),
            None => write!(f, "Feature #{}: {}", self.index, self.message),
        }
    }
}

/// Result of importing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    /// The imported file.
    pub file: PathBuf,
    /// Metadata inferred from the file path.
    pub source_info: SourceInfo,
    /// Year recorded on the created features.
    pub year: Option<i32>,
    /// Number of elements in the document.
    pub total: usize,
    /// Number of features created.
    pub loaded: usize,
    /// Number of elements that failed.
    pub failed: usize,
    /// The first failures, ordered by element index.
    pub errors: Vec<ItemError>,
    /// Ids of the created features, in element order.
    pub created_ids: Vec<i64>,
    /// Wall-clock duration of the import.
    pub elapsed: Duration,
    /// Whether the import stopped early because it was cancelled.
    pub cancelled: bool,
    /// Why the spatial index could not be recorded, if it failed. The
    /// created features are committed either way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_index_error: Option<String>,
}

impl ImportResult {
    /// Elapsed time in fractional seconds.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Outcome of one file within a directory import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileImportOutcome {
    /// The file was read and decoded; individual items may still have
    /// failed.
    Imported(ImportResult),
    /// The file could not be imported at all.
    Failed {
        /// The file that failed.
        file: PathBuf,
        /// Description of what went wrong.
        error: String,
    },
}

impl FileImportOutcome {
    /// The file this outcome is for.
    #[must_use]
    pub const fn file(&self) -> &PathBuf {
        match self {
            Self::Imported(result) => &result.file,
            Self::Failed { file, .. } => file,
        }
    }
}

/// Result of importing every matching file under a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryImportSummary {
    /// The scanned directory.
    pub directory: PathBuf,
    /// Number of files attempted.
    pub attempted: usize,
    /// Number of files imported without a file-level failure.
    pub succeeded: usize,
    /// Number of files that failed entirely.
    pub failed: usize,
    /// Total features created across all files.
    pub total_loaded: usize,
    /// Per-file outcomes, in discovery order.
    pub files: Vec<FileImportOutcome>,
    /// Wall-clock duration of the whole import.
    pub elapsed: Duration,
    /// Whether the import stopped early because it was cancelled.
    pub cancelled: bool,
}

/// Result of a diff-by-name update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalUpdateResult {
    /// The processed file.
    pub file: PathBuf,
    /// Features created because no record with their name existed.
    pub new_count: usize,
    /// Elements whose name already existed; left untouched.
    pub existing_count: usize,
    /// Elements with neither a name nor a clean name.
    pub skipped_count: usize,
    /// Elements that failed to decode or persist.
    pub failed_count: usize,
    /// Elements examined.
    pub total_processed: usize,
    /// Ids of the created features, in element order.
    pub created_ids: Vec<i64>,
    /// The first failures, ordered by element index.
    pub errors: Vec<ItemError>,
    /// Whether the update stopped early because it was cancelled.
    pub cancelled: bool,
    /// Why the spatial index could not be recorded, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_index_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.error_sample_size, 5);
        assert_eq!(config.file_suffix, ".geojson");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: IngestConfig = toml::from_str(
            "workers = 2\n\
             [retry]\n\
             max_retries = 7\n",
        )
        .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(
            config.retry.base_delay_ms,
            RetryPolicy::default().base_delay_ms
        );
    }

    #[test]
    fn item_error_display_prefers_feature_id() {
        let mut error = ItemError {
            index: 3,
            feature_id: Some("moda".to_string()),
            kind: ItemErrorKind::Geometry,
            message: "Geometry is empty".to_string(),
        };
        assert_eq!(error.to_string(), "Feature moda: Geometry is empty");

        error.feature_id = None;
        assert_eq!(error.to_string(), "Feature #3: Geometry is empty");
    }
}
