#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial feature store for the hazard map.
//!
//! Features are stored in a single `DuckDB` table with their `GeoJSON`
//! geometry as plain TEXT, a derived centroid, one `DOUBLE` column per
//! hazard attribute, and the untouched source properties as JSON text.
//! Every write happens inside one transaction so a failed record leaves
//! nothing behind.

pub mod geometry;
pub mod paths;
pub mod retry;
pub mod store;

pub use geometry::GeometryError;
pub use retry::RetryPolicy;
pub use store::FeatureStore;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Feature geometry failed validation.
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No feature exists with the requested id.
    #[error("Feature {id} not found")]
    NotFound {
        /// The requested id.
        id: i64,
    },

    /// Stored data could not be converted back into a model value.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl StoreError {
    /// Returns `true` if the error is likely transient and worth retrying.
    ///
    /// Write-write conflicts between sessions and file lock/I/O failures
    /// qualify. Validation and lookup failures never do.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DuckDb(e) => {
                let message = e.to_string();
                message.contains("Conflict")
                    || message.contains("IO Error")
                    || message.contains("Could not set lock")
            }
            Self::Io(_) => true,
            Self::Geometry(_) | Self::Json(_) | Self::NotFound { .. } | Self::Conversion { .. } => {
                false
            }
        }
    }
}
