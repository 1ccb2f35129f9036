#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature record types and query result definitions.
//!
//! These types represent the shapes of data as handed to and returned by
//! the spatial store. [`FeatureInput`] is what the decoder produces;
//! [`Feature`] is what the store persists and hands back.

use chrono::{DateTime, Utc};
use hazard_map_hazard_models::HazardAttributes;
use serde::{Deserialize, Serialize};

/// Property key holding the primary neighborhood name.
pub const NAME_KEY: &str = "Name";
/// Property key holding the normalized neighborhood name.
pub const CLEAN_NAME_KEY: &str = "clean_name";
/// Property key holding the formal neighborhood name.
pub const NEIGHBORHOOD_NAME_KEY: &str = "mahalle_adi";
/// Property key holding the containing district name.
pub const DISTRICT_KEY: &str = "ilce_adi";
/// Property key holding the numeric source neighborhood id.
pub const MAH_ID_KEY: &str = "mah_id";

/// Output property key for the model-predicted risk score.
pub const PREDICTED_RISK_KEY: &str = "predicted_risk_score";
/// Output property key for the prediction confidence.
pub const PREDICTION_CONFIDENCE_KEY: &str = "prediction_confidence";
/// Output property key for the prediction timestamp.
pub const PREDICTION_TIMESTAMP_KEY: &str = "prediction_timestamp";

/// The only coordinate reference system features are stored in.
pub const WGS84_SRID: i32 = 4326;

/// A single decoded source record, not yet validated against the store's
/// geometry rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInput {
    /// The `id` member of the source feature, if any. Only used to label
    /// errors.
    pub source_feature_id: Option<String>,
    /// Raw `GeoJSON` geometry object.
    pub geometry: serde_json::Value,
    /// The complete source properties object.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Coordinate reference system named by the enclosing document, if any.
    pub crs: Option<String>,
}

impl FeatureInput {
    /// Creates an input from a geometry and properties with no id or CRS.
    #[must_use]
    pub const fn new(
        geometry: serde_json::Value,
        properties: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            source_feature_id: None,
            geometry,
            properties,
            crs: None,
        }
    }

    /// Extracts the name fields from the properties.
    #[must_use]
    pub fn names(&self) -> FeatureNames {
        FeatureNames::from_properties(&self.properties)
    }

    /// Extracts the typed hazard attributes from the properties.
    #[must_use]
    pub fn attributes(&self) -> HazardAttributes {
        HazardAttributes::from_properties(&self.properties)
    }

    /// Returns the name used to detect already-ingested records: the
    /// primary name, falling back to the clean name.
    #[must_use]
    pub fn lookup_name(&self) -> Option<&str> {
        [NAME_KEY, CLEAN_NAME_KEY]
            .iter()
            .filter_map(|key| self.properties.get(*key))
            .filter_map(serde_json::Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Returns a label for error messages.
    #[must_use]
    pub fn label(&self) -> String {
        self.source_feature_id
            .clone()
            .or_else(|| self.lookup_name().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Name fields of a feature, all used for fuzzy lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureNames {
    /// Primary name.
    pub name: Option<String>,
    /// Normalized name.
    pub clean_name: Option<String>,
    /// Formal neighborhood name.
    pub neighborhood_name: Option<String>,
    /// Containing district name.
    pub district: Option<String>,
    /// Numeric neighborhood id from the source.
    pub mah_id: Option<f64>,
}

impl FeatureNames {
    /// Reads the name fields from a properties object.
    #[must_use]
    pub fn from_properties(properties: &serde_json::Map<String, serde_json::Value>) -> Self {
        let text = |key: &str| {
            properties
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            name: text(NAME_KEY),
            clean_name: text(CLEAN_NAME_KEY),
            neighborhood_name: text(NEIGHBORHOOD_NAME_KEY),
            district: text(DISTRICT_KEY),
            mah_id: properties.get(MAH_ID_KEY).and_then(serde_json::Value::as_f64),
        }
    }
}

/// Where a feature came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Originating file identifier.
    pub source_file: Option<String>,
    /// Year the data refers to, if known.
    pub year: Option<i32>,
}

/// A derived representative point (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Latitude (WGS84).
    pub latitude: f64,
}

/// Model output written onto a feature by the enrichment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted risk score.
    pub score: f64,
    /// Per-class probabilities, when the model provides them.
    pub probabilities: Option<Vec<f64>>,
}

impl Prediction {
    /// Confidence of the prediction: the largest class probability.
    #[must_use]
    pub fn confidence(&self) -> Option<f64> {
        self.probabilities
            .as_ref()
            .and_then(|p| p.iter().copied().filter(|v| v.is_finite()).reduce(f64::max))
    }
}

/// Prediction fields as stored on a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionAnnotation {
    /// Predicted risk score.
    pub predicted_risk_score: f64,
    /// Confidence of the prediction.
    pub prediction_confidence: Option<f64>,
    /// When the prediction was written.
    pub prediction_timestamp: DateTime<Utc>,
}

/// A persisted hazard record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Store-assigned primary key.
    pub id: i64,
    /// Name fields.
    pub names: FeatureNames,
    /// Stored geometry (WGS84).
    pub geometry: geojson::Geometry,
    /// `GeoJSON` type name of the geometry.
    pub geometry_type: String,
    /// Centroid derived from `geometry` at creation.
    pub centroid: Centroid,
    /// Typed hazard attributes.
    pub attributes: HazardAttributes,
    /// The complete source properties, as supplied.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Enrichment output, if the feature has been annotated.
    pub prediction: Option<PredictionAnnotation>,
    /// Provenance.
    pub provenance: Provenance,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last touched.
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    /// Returns the properties to emit on output: the source properties with
    /// any prediction fields merged in.
    #[must_use]
    pub fn output_properties(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut properties = self.properties.clone();

        if let Some(prediction) = &self.prediction {
            properties.insert(
                PREDICTED_RISK_KEY.to_string(),
                serde_json::Value::from(prediction.predicted_risk_score),
            );
            if let Some(confidence) = prediction.prediction_confidence {
                properties.insert(
                    PREDICTION_CONFIDENCE_KEY.to_string(),
                    serde_json::Value::from(confidence),
                );
            }
            properties.insert(
                PREDICTION_TIMESTAMP_KEY.to_string(),
                serde_json::Value::from(prediction.prediction_timestamp.to_rfc3339()),
            );
        }

        properties
    }
}

/// Metadata recording that a spatial index exists over feature geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialIndexDescriptor {
    /// Unique index name.
    pub index_name: String,
    /// Indexed table.
    pub table_name: String,
    /// Indexed geometry column.
    pub geometry_column: String,
    /// Coordinate reference system of the column.
    pub srid: i32,
    /// Geometry type of the column.
    pub geometry_type: String,
    /// When the index was first created.
    pub created_at: DateTime<Utc>,
}

/// Aggregate statistics for the features of one district filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictStatistics {
    /// The district filter that was applied.
    pub district: String,
    /// Number of matching features.
    pub neighborhood_count: u64,
    /// Mean composite risk score (0 when none).
    pub average_risk: f64,
    /// Minimum composite risk score (0 when none).
    pub min_risk: f64,
    /// Maximum composite risk score (0 when none).
    pub max_risk: f64,
    /// Summed population.
    pub total_population: i64,
    /// Summed building count.
    pub total_buildings: i64,
}

/// Whole-store statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    /// Number of stored features.
    pub total_records: u64,
    /// Number of distinct district names.
    pub total_districts: u64,
    /// Number of distinct source files.
    pub source_files: u64,
    /// Earliest creation time.
    pub first_import: Option<DateTime<Utc>>,
    /// Latest update time.
    pub last_update: Option<DateTime<Utc>>,
}

/// Data category inferred from a source file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// Model prediction output.
    Prediction,
    /// Final published data.
    Final,
    /// Anything else.
    Current,
}

/// Best-effort metadata inferred from a source path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Final path component.
    pub filename: String,
    /// First four-digit path component.
    pub year: Option<i32>,
    /// Known city name found in the file stem.
    pub city: Option<String>,
    /// Data category.
    pub kind: SourceKind,
}
