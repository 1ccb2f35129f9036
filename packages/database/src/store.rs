//! `DuckDB` feature storage.
//!
//! A [`FeatureStore`] wraps one `DuckDB` connection (a session). Sessions
//! are synchronous and must not be shared between threads; callers that
//! write in parallel take one [`FeatureStore::try_clone`] per worker.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::Connection;
use duckdb::types::Value;
use hazard_map_database_models::{
    Centroid, DistrictStatistics, Feature, FeatureInput, FeatureNames, Prediction,
    PredictionAnnotation, Provenance, SpatialIndexDescriptor, StoreStatistics, WGS84_SRID,
};
use hazard_map_hazard_models::{HazardAttribute, HazardAttributes};

use crate::{StoreError, geometry};

/// Name of the feature table.
pub const FEATURES_TABLE: &str = "features";

/// Name of the geometry column in the feature table.
pub const GEOMETRY_COLUMN: &str = "geometry_geojson";

/// Name of the spatial index recorded over the feature geometry column.
pub const SPATIAL_INDEX_NAME: &str = "idx_features_geometry_rtree";

/// Columns read for every feature, in row order. The hazard attribute
/// columns follow.
const BASE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "clean_name",
    "neighborhood_name",
    "district",
    "mah_id",
    "geometry_geojson",
    "geometry_type",
    "centroid_lon",
    "centroid_lat",
    "properties",
    "predicted_risk_score",
    "prediction_confidence",
    "prediction_timestamp",
    "source_file",
    "year",
    "created_at",
    "updated_at",
];

/// Columns written on insert, in parameter order. The hazard attribute
/// columns follow.
const INSERT_COLUMNS: &[&str] = &[
    "name",
    "clean_name",
    "neighborhood_name",
    "district",
    "mah_id",
    "geometry_geojson",
    "geometry_type",
    "centroid_lon",
    "centroid_lat",
    "properties",
    "source_file",
    "year",
    "created_at",
    "updated_at",
];

fn quoted_attribute_columns() -> impl Iterator<Item = String> {
    HazardAttribute::all()
        .iter()
        .map(|a| format!("\"{}\"", a.column()))
}

static SELECT_COLUMNS: LazyLock<String> = LazyLock::new(|| {
    BASE_COLUMNS
        .iter()
        .map(|c| (*c).to_string())
        .chain(quoted_attribute_columns())
        .collect::<Vec<_>>()
        .join(", ")
});

static INSERT_SQL: LazyLock<String> = LazyLock::new(|| {
    let columns: Vec<String> = INSERT_COLUMNS
        .iter()
        .map(|c| (*c).to_string())
        .chain(quoted_attribute_columns())
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");

    format!(
        "INSERT INTO {FEATURES_TABLE} ({}) VALUES ({placeholders}) RETURNING id",
        columns.join(", ")
    )
});

static COMPOSITE_COLUMN: LazyLock<String> =
    LazyLock::new(|| format!("\"{}\"", HazardAttribute::COMPOSITE_RISK.column()));

/// A session on the feature database.
pub struct FeatureStore {
    conn: Connection,
    revision: Arc<AtomicU64>,
}

impl std::fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStore")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

impl FeatureStore {
    /// Opens (or creates) a feature database at `path` and ensures the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory, connection, or schema
    /// creation fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        log::debug!("Opening feature store at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory feature database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        create_schema(&conn)?;

        Ok(Self {
            conn,
            revision: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Opens another independent session on the same database. The new
    /// session shares this one's revision counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection cannot be cloned.
    pub fn try_clone(&self) -> Result<Self, StoreError> {
        Ok(Self {
            conn: self.conn.try_clone()?,
            revision: Arc::clone(&self.revision),
        })
    }

    /// Closes the session, reporting any error from the underlying
    /// connection. Dropping the store also releases it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `DuckDB` fails to close the connection.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::DuckDb(e))
    }

    /// A counter bumped every time a feature is created through any session
    /// cloned from the same root. Used to invalidate derived caches.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Validates and persists one feature.
    ///
    /// Everything (names, attributes, raw properties, geometry, and the
    /// centroid) is written by a single `INSERT ... RETURNING` inside one
    /// transaction. A failure leaves no record behind.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Geometry`] if the geometry fails validation,
    /// or another [`StoreError`] if the write fails.
    pub fn create(
        &self,
        input: &FeatureInput,
        provenance: &Provenance,
    ) -> Result<Feature, StoreError> {
        let valid = geometry::validate(&input.geometry, input.crs.as_deref())?;
        let names = input.names();
        let attributes = input.attributes();
        let now = Utc::now();
        let timestamp = format_timestamp(&now);

        let mut values: Vec<Value> = vec![
            text(names.name.as_deref()),
            text(names.clean_name.as_deref()),
            text(names.neighborhood_name.as_deref()),
            text(names.district.as_deref()),
            double(names.mah_id),
            Value::Text(serde_json::to_string(&valid.geojson)?),
            Value::Text(valid.type_name.to_string()),
            Value::Double(valid.centroid.longitude),
            Value::Double(valid.centroid.latitude),
            Value::Text(serde_json::to_string(&input.properties)?),
            text(provenance.source_file.as_deref()),
            provenance.year.map_or(Value::Null, Value::Int),
            Value::Text(timestamp.clone()),
            Value::Text(timestamp),
        ];
        values.extend(
            HazardAttribute::all()
                .iter()
                .map(|a| double(attributes.get(*a))),
        );

        let tx = self.conn.unchecked_transaction()?;
        let id: i64 = tx.query_row(
            INSERT_SQL.as_str(),
            duckdb::params_from_iter(values),
            |row| row.get(0),
        )?;
        tx.commit()?;

        self.revision.fetch_add(1, Ordering::SeqCst);
        log::debug!("Created feature {id} ({})", valid.type_name);

        Ok(Feature {
            id,
            names,
            geometry: valid.geojson,
            geometry_type: valid.type_name.to_string(),
            centroid: valid.centroid,
            attributes,
            properties: input.properties.clone(),
            prediction: None,
            provenance: provenance.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Looks up one feature by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no feature has that id, or
    /// another [`StoreError`] if the query fails.
    pub fn get_by_id(&self, id: i64) -> Result<Feature, StoreError> {
        let sql = format!(
            "SELECT {} FROM {FEATURES_TABLE} WHERE id = ?",
            SELECT_COLUMNS.as_str()
        );

        match self.conn.query_row(&sql, duckdb::params![id], read_row) {
            Ok(row) => row.into_feature(),
            Err(duckdb::Error::QueryReturnedNoRows) => Err(StoreError::NotFound { id }),
            Err(e) => Err(e.into()),
        }
    }

    /// Finds features whose name, clean name, or neighborhood name contains
    /// `query`, ignoring case. Ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn get_by_name(&self, query: &str) -> Result<Vec<Feature>, StoreError> {
        self.select(
            "WHERE contains(lower(name), lower(?)) \
                OR contains(lower(clean_name), lower(?)) \
                OR contains(lower(neighborhood_name), lower(?)) \
             ORDER BY id",
            &[query, query, query],
        )
    }

    /// Finds features whose district contains `query`, ignoring case.
    /// Ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn get_by_district(&self, query: &str) -> Result<Vec<Feature>, StoreError> {
        self.select(
            "WHERE contains(lower(district), lower(?)) ORDER BY id",
            &[query],
        )
    }

    /// Returns the id of the first feature [`Self::get_by_name`] would
    /// return for `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn find_id_by_name(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let result = self.conn.query_row(
            &format!(
                "SELECT id FROM {FEATURES_TABLE} \
                 WHERE contains(lower(name), lower(?)) \
                    OR contains(lower(clean_name), lower(?)) \
                    OR contains(lower(neighborhood_name), lower(?)) \
                 ORDER BY id LIMIT 1"
            ),
            duckdb::params![name, name, name],
            |row| row.get(0),
        );

        match result {
            Ok(id) => Ok(Some(id)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns up to `limit` features after skipping `offset`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn list(&self, offset: u64, limit: u64) -> Result<Vec<Feature>, StoreError> {
        self.select(&format!("ORDER BY id LIMIT {limit} OFFSET {offset}"), &[])
    }

    /// Returns every feature whose composite risk score is at least
    /// `threshold`, highest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn high_risk(&self, threshold: f64) -> Result<Vec<Feature>, StoreError> {
        let column = COMPOSITE_COLUMN.as_str();
        let sql = format!(
            "SELECT {} FROM {FEATURES_TABLE} WHERE {column} >= ? ORDER BY {column} DESC, id",
            SELECT_COLUMNS.as_str()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(duckdb::params![threshold], read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRow::into_feature).collect()
    }

    /// Counts stored features.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {FEATURES_TABLE}"),
            [],
            |row| row.get(0),
        )?;

        non_negative(count)
    }

    /// Returns every feature's id and stored `GeoJSON` geometry text,
    /// ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn geometries(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, {GEOMETRY_COLUMN} FROM {FEATURES_TABLE} ORDER BY id"
        ))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Writes prediction output onto a feature. Only the prediction columns
    /// and `updated_at` change; ingestion-owned fields are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no feature has that id, or
    /// another [`StoreError`] if the update fails.
    pub fn annotate_prediction(
        &self,
        id: i64,
        prediction: &Prediction,
    ) -> Result<PredictionAnnotation, StoreError> {
        let annotation = PredictionAnnotation {
            predicted_risk_score: prediction.score,
            prediction_confidence: prediction.confidence(),
            prediction_timestamp: Utc::now(),
        };
        let timestamp = format_timestamp(&annotation.prediction_timestamp);

        let updated = self.conn.execute(
            &format!(
                "UPDATE {FEATURES_TABLE} SET
                    predicted_risk_score = ?,
                    prediction_confidence = ?,
                    prediction_timestamp = ?,
                    updated_at = ?
                 WHERE id = ?"
            ),
            duckdb::params![
                annotation.predicted_risk_score,
                annotation.prediction_confidence,
                timestamp,
                timestamp,
                id,
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound { id });
        }

        Ok(annotation)
    }

    /// Records the spatial index over the feature geometry column.
    ///
    /// Idempotent: returns the existing descriptor and `false` if the index
    /// is already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert or lookup fails.
    pub fn ensure_spatial_index(&self) -> Result<(SpatialIndexDescriptor, bool), StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO spatial_indices
                (index_name, table_name, geometry_column, srid, geometry_type, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (index_name) DO NOTHING",
            duckdb::params![
                SPATIAL_INDEX_NAME,
                FEATURES_TABLE,
                GEOMETRY_COLUMN,
                WGS84_SRID,
                "GEOMETRY",
                format_timestamp(&Utc::now()),
            ],
        )?;

        let created = inserted > 0;
        if created {
            log::info!("Created spatial index {SPATIAL_INDEX_NAME}");
        }

        let descriptor = self
            .spatial_indexes()?
            .into_iter()
            .find(|d| d.index_name == SPATIAL_INDEX_NAME)
            .ok_or_else(|| StoreError::Conversion {
                message: format!("spatial index {SPATIAL_INDEX_NAME} missing after insert"),
            })?;

        Ok((descriptor, created))
    }

    /// Lists recorded spatial indexes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn spatial_indexes(&self) -> Result<Vec<SpatialIndexDescriptor>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT index_name, table_name, geometry_column, srid, geometry_type, created_at
             FROM spatial_indices ORDER BY index_name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(index_name, table_name, geometry_column, srid, geometry_type, created_at)| {
                    Ok(SpatialIndexDescriptor {
                        index_name,
                        table_name,
                        geometry_column,
                        srid,
                        geometry_type,
                        created_at: parse_timestamp(&created_at)?,
                    })
                },
            )
            .collect()
    }

    /// Aggregates the composite risk score, population, and building count
    /// over features whose district contains `query`, ignoring case.
    ///
    /// All figures are zero when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn district_aggregate(&self, query: &str) -> Result<DistrictStatistics, StoreError> {
        let risk = COMPOSITE_COLUMN.as_str();
        let population = HazardAttribute::POPULATION.column();
        let buildings = HazardAttribute::BUILDINGS.column();

        let (count, average, min, max, population, buildings): (
            i64,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        ) = self.conn.query_row(
            &format!(
                "SELECT COUNT(*), AVG({risk}), MIN({risk}), MAX({risk}),
                        SUM(\"{population}\"), SUM(\"{buildings}\")
                 FROM {FEATURES_TABLE}
                 WHERE contains(lower(district), lower(?))"
            ),
            duckdb::params![query],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

        #[allow(clippy::cast_possible_truncation)]
        let whole = |v: Option<f64>| v.map_or(0, |v| v.round() as i64);

        Ok(DistrictStatistics {
            district: query.to_string(),
            neighborhood_count: non_negative(count)?,
            average_risk: average.unwrap_or(0.0),
            min_risk: min.unwrap_or(0.0),
            max_risk: max.unwrap_or(0.0),
            total_population: whole(population),
            total_buildings: whole(buildings),
        })
    }

    /// Snapshots whole-store statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let (total, districts, sources, first, last): (
            i64,
            i64,
            i64,
            Option<String>,
            Option<String>,
        ) = self.conn.query_row(
            &format!(
                "SELECT COUNT(*), COUNT(DISTINCT district), COUNT(DISTINCT source_file),
                        MIN(created_at), MAX(updated_at)
                 FROM {FEATURES_TABLE}"
            ),
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        Ok(StoreStatistics {
            total_records: non_negative(total)?,
            total_districts: non_negative(districts)?,
            source_files: non_negative(sources)?,
            first_import: first.as_deref().map(parse_timestamp).transpose()?,
            last_update: last.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    fn select(&self, clause: &str, params: &[&str]) -> Result<Vec<Feature>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {FEATURES_TABLE} {clause}",
            SELECT_COLUMNS.as_str()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(params.iter().copied()), read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRow::into_feature).collect()
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    let attribute_columns = HazardAttribute::all()
        .iter()
        .map(|a| format!("\"{}\" DOUBLE", a.column()))
        .collect::<Vec<_>>()
        .join(",\n            ");

    conn.execute_batch(&format!(
        "CREATE SEQUENCE IF NOT EXISTS features_id_seq START 1;

        CREATE TABLE IF NOT EXISTS {FEATURES_TABLE} (
            id BIGINT PRIMARY KEY DEFAULT nextval('features_id_seq'),
            name TEXT,
            clean_name TEXT,
            neighborhood_name TEXT,
            district TEXT,
            mah_id DOUBLE,
            geometry_geojson TEXT NOT NULL,
            geometry_type TEXT NOT NULL,
            centroid_lon DOUBLE NOT NULL,
            centroid_lat DOUBLE NOT NULL,
            properties TEXT NOT NULL,
            predicted_risk_score DOUBLE,
            prediction_confidence DOUBLE,
            prediction_timestamp TEXT,
            source_file TEXT,
            year INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            {attribute_columns}
        );

        CREATE TABLE IF NOT EXISTS spatial_indices (
            index_name TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            geometry_column TEXT NOT NULL,
            srid INTEGER NOT NULL,
            geometry_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        );"
    ))?;

    Ok(())
}

/// A feature row as read from `DuckDB`, before JSON and timestamp parsing.
struct RawRow {
    id: i64,
    names: FeatureNames,
    geometry: String,
    geometry_type: String,
    centroid: Centroid,
    properties: String,
    predicted_risk_score: Option<f64>,
    prediction_confidence: Option<f64>,
    prediction_timestamp: Option<String>,
    provenance: Provenance,
    created_at: String,
    updated_at: String,
    attributes: HazardAttributes,
}

fn read_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawRow> {
    let mut attributes = HazardAttributes::new();
    for (i, attribute) in HazardAttribute::all().iter().enumerate() {
        if let Some(value) = row.get::<_, Option<f64>>(BASE_COLUMNS.len() + i)? {
            attributes.set(*attribute, value);
        }
    }

    Ok(RawRow {
        id: row.get(0)?,
        names: FeatureNames {
            name: row.get(1)?,
            clean_name: row.get(2)?,
            neighborhood_name: row.get(3)?,
            district: row.get(4)?,
            mah_id: row.get(5)?,
        },
        geometry: row.get(6)?,
        geometry_type: row.get(7)?,
        centroid: Centroid {
            longitude: row.get(8)?,
            latitude: row.get(9)?,
        },
        properties: row.get(10)?,
        predicted_risk_score: row.get(11)?,
        prediction_confidence: row.get(12)?,
        prediction_timestamp: row.get(13)?,
        provenance: Provenance {
            source_file: row.get(14)?,
            year: row.get(15)?,
        },
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        attributes,
    })
}

impl RawRow {
    fn into_feature(self) -> Result<Feature, StoreError> {
        let geometry: geojson::Geometry = serde_json::from_str(&self.geometry)?;
        let properties: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.properties)?;

        let prediction = match (self.predicted_risk_score, self.prediction_timestamp) {
            (Some(score), Some(timestamp)) => Some(PredictionAnnotation {
                predicted_risk_score: score,
                prediction_confidence: self.prediction_confidence,
                prediction_timestamp: parse_timestamp(&timestamp)?,
            }),
            _ => None,
        };

        Ok(Feature {
            id: self.id,
            names: self.names,
            geometry,
            geometry_type: self.geometry_type,
            centroid: self.centroid,
            attributes: self.attributes,
            properties,
            prediction,
            provenance: self.provenance,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::Text(s.to_string()))
}

fn double(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Double)
}

fn non_negative(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Conversion {
        message: format!("negative count {value}"),
    })
}

/// Formats a timestamp so that lexical order matches chronological order.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Conversion {
            message: format!("invalid timestamp {value:?}: {e}"),
        })
}
