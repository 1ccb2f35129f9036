//! Pipeline configuration, loadable from TOML.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```toml
//! database_path = "data/istanbul.duckdb"
//! make_predictions = false
//! year = 2023
//!
//! [ingest]
//! batch_size = 250
//! workers = 8
//! ```

use std::path::{Path, PathBuf};

use hazard_map_ingest_models::IngestConfig;
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Settings for a [`crate::PipelineCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `DuckDB` file backing the feature store.
    pub database_path: PathBuf,
    /// Run the enrichment step when an enricher is configured.
    pub make_predictions: bool,
    /// Provenance year applied to every ingested file, overriding the path
    /// heuristic.
    pub year: Option<i32>,
    /// Ingestion settings.
    pub ingest: IngestConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: hazard_map_database::paths::default_db_path(),
            make_predictions: true,
            year: None,
            ingest: IngestConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the text is not a valid config.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read, or
    /// [`PipelineError::Config`] if it is not a valid config.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loaded pipeline config from {}", path.display());
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.make_predictions);
        assert!(config.database_path.ends_with("hazard_map.duckdb"));
    }

    #[test]
    fn nested_ingest_section() {
        let config = PipelineConfig::from_toml_str(
            r#"
            database_path = "/tmp/hazard.duckdb"
            make_predictions = false
            year = 2023

            [ingest]
            batch_size = 250
            file_suffix = ".json"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/hazard.duckdb"));
        assert!(!config.make_predictions);
        assert_eq!(config.year, Some(2023));
        assert_eq!(config.ingest.batch_size, 250);
        assert_eq!(config.ingest.file_suffix, ".json");
        assert_eq!(config.ingest.workers, IngestConfig::default().workers);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(matches!(
            PipelineConfig::from_toml_str("make_predictions = \"yes\""),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let tmp = std::env::temp_dir().join("hazard_map_pipeline_config_test");
        let _ = std::fs::remove_dir_all(&tmp);
        std::fs::create_dir_all(&tmp).unwrap();
        let path = tmp.join("pipeline.toml");
        std::fs::write(&path, "year = 2021\n").unwrap();

        assert_eq!(PipelineConfig::load(&path).unwrap().year, Some(2021));
        assert!(matches!(
            PipelineConfig::load(&tmp.join("missing.toml")),
            Err(PipelineError::Io(_))
        ));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
