#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Decodes `GeoJSON` documents into [`FeatureInput`] values.
//!
//! A document may be a `FeatureCollection`, a single `Feature`, or a bare
//! geometry. Document-level problems (invalid JSON, an unknown top-level
//! kind) fail the whole decode. Problems with an individual element of a
//! collection are returned per element so one malformed feature never
//! hides the rest of the file.

pub mod source;

pub use source::source_info;

use hazard_map_database_models::FeatureInput;
use serde::{Deserialize, Serialize};

/// Geometry types that carry a `coordinates` member.
const COORDINATE_GEOMETRIES: &[&str] = &[
    "Point",
    "LineString",
    "Polygon",
    "MultiPoint",
    "MultiLineString",
    "MultiPolygon",
];

/// Structural errors found while decoding a document or one of its
/// elements.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The text is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required member is absent or null.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Name of the missing member.
        field: String,
    },

    /// The top-level `type` is not a recognized `GeoJSON` kind.
    #[error("Unrecognized GeoJSON type: {kind}")]
    UnrecognizedKind {
        /// The `type` value found, or `<none>`.
        kind: String,
    },

    /// A member has the wrong JSON shape.
    #[error("Invalid shape: {message}")]
    InvalidShape {
        /// Description of what went wrong.
        message: String,
    },
}

impl DecodeError {
    fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    fn shape(message: impl Into<String>) -> Self {
        Self::InvalidShape {
            message: message.into(),
        }
    }
}

/// Top-level kind of a decoded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    /// A `FeatureCollection` with zero or more elements.
    FeatureCollection,
    /// A single `Feature`.
    Feature,
    /// A bare geometry object, decoded as one feature with no properties.
    Geometry,
}

/// A decoded document: one result per element, in document order.
#[derive(Debug)]
pub struct DecodedDocument {
    /// Top-level kind.
    pub kind: DocumentKind,
    /// Coordinate reference system named by the document, if any.
    pub crs: Option<String>,
    /// Per-element decode results.
    pub items: Vec<Result<FeatureInput, DecodeError>>,
}

impl DecodedDocument {
    /// Number of elements in the document, decodable or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the document has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Geographic extent of a document's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge.
    pub min_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl BoundingBox {
    /// Center of the box as `(lon, lat)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            f64::midpoint(self.min_lon, self.max_lon),
            f64::midpoint(self.min_lat, self.max_lat),
        )
    }

    fn extend(&mut self, lon: f64, lat: f64) {
        self.min_lon = self.min_lon.min(lon);
        self.min_lat = self.min_lat.min(lat);
        self.max_lon = self.max_lon.max(lon);
        self.max_lat = self.max_lat.max(lat);
    }
}

/// Decodes a `GeoJSON` document.
///
/// # Errors
///
/// Returns [`DecodeError`] if the text is not JSON, is not an object, has
/// an unrecognized `type`, or is a collection without a `features` array.
/// Errors in individual elements are returned inside
/// [`DecodedDocument::items`] instead.
pub fn decode_document(text: &str) -> Result<DecodedDocument, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let Some(object) = value.as_object() else {
        return Err(DecodeError::shape("document is not a JSON object"));
    };

    let crs = crs_name(object.get("crs"));
    let kind = object
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("<none>");

    let (kind, items) = match kind {
        "FeatureCollection" => {
            let features = object
                .get("features")
                .ok_or_else(|| DecodeError::missing("features"))?
                .as_array()
                .ok_or_else(|| DecodeError::shape("`features` is not an array"))?;

            let items = features
                .iter()
                .map(|feature| decode_feature(feature, crs.as_deref()))
                .collect();

            (DocumentKind::FeatureCollection, items)
        }
        "Feature" => (
            DocumentKind::Feature,
            vec![decode_feature(&value, crs.as_deref())],
        ),
        "GeometryCollection" => {
            require_member(object, "geometries")?;
            (
                DocumentKind::Geometry,
                vec![Ok(bare_geometry(&value, crs.clone()))],
            )
        }
        other if COORDINATE_GEOMETRIES.contains(&other) => {
            require_member(object, "coordinates")?;
            (
                DocumentKind::Geometry,
                vec![Ok(bare_geometry(&value, crs.clone()))],
            )
        }
        other => {
            return Err(DecodeError::UnrecognizedKind {
                kind: other.to_string(),
            });
        }
    };

    let document = DecodedDocument { kind, crs, items };

    log::debug!(
        "Decoded {:?} document with {} element(s)",
        document.kind,
        document.len()
    );

    Ok(document)
}

fn require_member(
    object: &serde_json::Map<String, serde_json::Value>,
    member: &str,
) -> Result<(), DecodeError> {
    match object.get(member) {
        Some(v) if !v.is_null() => Ok(()),
        _ => Err(DecodeError::missing(member)),
    }
}

fn bare_geometry(geometry: &serde_json::Value, crs: Option<String>) -> FeatureInput {
    FeatureInput {
        source_feature_id: None,
        geometry: geometry.clone(),
        properties: serde_json::Map::new(),
        crs,
    }
}

/// Decodes a single `Feature` object.
fn decode_feature(
    feature: &serde_json::Value,
    crs: Option<&str>,
) -> Result<FeatureInput, DecodeError> {
    let Some(object) = feature.as_object() else {
        return Err(DecodeError::shape("feature is not a JSON object"));
    };

    match object.get("type").and_then(serde_json::Value::as_str) {
        Some("Feature") | None => {}
        Some(other) => {
            return Err(DecodeError::shape(format!(
                "expected a Feature, found {other}"
            )));
        }
    }

    let geometry = match object.get("geometry") {
        Some(g) if !g.is_null() => g.clone(),
        _ => return Err(DecodeError::missing("geometry")),
    };

    // A null properties member is allowed by GeoJSON.
    let properties = match object.get("properties") {
        None => return Err(DecodeError::missing("properties")),
        Some(serde_json::Value::Null) => serde_json::Map::new(),
        Some(serde_json::Value::Object(map)) => map.clone(),
        Some(_) => return Err(DecodeError::shape("`properties` is not an object")),
    };

    let source_feature_id = match object.get("id") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(FeatureInput {
        source_feature_id,
        geometry,
        properties,
        crs: crs.map(str::to_string),
    })
}

/// Reads the CRS name from either the legacy named-CRS object or a plain
/// string.
fn crs_name(crs: Option<&serde_json::Value>) -> Option<String> {
    match crs? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(object) => object
            .get("properties")
            .and_then(|p| p.get("name"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Computes the extent of every coordinate in the successfully decoded
/// elements of a document.
///
/// Returns `None` when the document holds no usable coordinates.
#[must_use]
pub fn bounding_box(document: &DecodedDocument) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;

    for input in document.items.iter().filter_map(|item| item.as_ref().ok()) {
        visit_geometry(&input.geometry, &mut |lon, lat| match &mut bbox {
            Some(b) => b.extend(lon, lat),
            None => {
                bbox = Some(BoundingBox {
                    min_lon: lon,
                    min_lat: lat,
                    max_lon: lon,
                    max_lat: lat,
                });
            }
        });
    }

    bbox
}

fn visit_geometry(geometry: &serde_json::Value, visit: &mut impl FnMut(f64, f64)) {
    if let Some(coordinates) = geometry.get("coordinates") {
        visit_coordinates(coordinates, visit);
    }
    if let Some(geometries) = geometry
        .get("geometries")
        .and_then(serde_json::Value::as_array)
    {
        for g in geometries {
            visit_geometry(g, visit);
        }
    }
}

fn visit_coordinates(value: &serde_json::Value, visit: &mut impl FnMut(f64, f64)) {
    let Some(array) = value.as_array() else {
        return;
    };

    match (
        array.first().and_then(serde_json::Value::as_f64),
        array.get(1).and_then(serde_json::Value::as_f64),
    ) {
        (Some(lon), Some(lat)) => {
            if lon.is_finite() && lat.is_finite() {
                visit(lon, lat);
            }
        }
        _ => {
            for nested in array {
                visit_coordinates(nested, visit);
            }
        }
    }
}
