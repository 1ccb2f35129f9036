//! Geometry validation and conversion.
//!
//! Incoming geometries arrive as raw `GeoJSON` values. Before anything is
//! persisted they are parsed, checked against the WGS84 coordinate rules,
//! and converted to [`geo::Geometry`] so the centroid can be derived.

use geo::Centroid as _;
use hazard_map_database_models::Centroid;

/// CRS names accepted as WGS84 longitude/latitude.
const WGS84_CODES: &[&str] = &["CRS84", "4326", "WGS84"];

/// Errors produced while validating a geometry.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The value is not a `GeoJSON` geometry.
    #[error("Unparseable geometry: {message}")]
    Parse {
        /// Description of what went wrong.
        message: String,
    },

    /// The geometry holds no positions.
    #[error("Geometry is empty")]
    Empty,

    /// A coordinate is NaN or infinite.
    #[error("Geometry has a non-finite coordinate")]
    NonFiniteCoordinate,

    /// A coordinate lies outside lon [-180, 180] / lat [-90, 90].
    #[error("Coordinate out of range: ({lon}, {lat})")]
    CoordinateOutOfRange {
        /// Longitude.
        lon: f64,
        /// Latitude.
        lat: f64,
    },

    /// A polygon ring does not end where it starts.
    #[error("Polygon ring is not closed")]
    UnclosedRing,

    /// A line or ring has fewer positions than its type requires.
    #[error("Too few positions: expected at least {expected}, found {found}")]
    TooFewPositions {
        /// Minimum position count.
        expected: usize,
        /// Actual position count.
        found: usize,
    },

    /// The document declares a CRS other than WGS84.
    #[error("Unsupported coordinate reference system: {crs}")]
    UnsupportedCrs {
        /// The declared CRS name.
        crs: String,
    },
}

/// A geometry that passed validation.
#[derive(Debug, Clone)]
pub struct ValidGeometry {
    /// The `GeoJSON` geometry as it will be stored.
    pub geojson: geojson::Geometry,
    /// The same geometry in `geo` form.
    pub geo: geo::Geometry<f64>,
    /// `GeoJSON` type name.
    pub type_name: &'static str,
    /// Derived representative point.
    pub centroid: Centroid,
}

/// Validates a raw `GeoJSON` geometry value.
///
/// # Errors
///
/// Returns [`GeometryError`] if the CRS is not WGS84, the value is not a
/// `GeoJSON` geometry, or any coordinate rule is violated.
pub fn validate(
    raw: &serde_json::Value,
    crs: Option<&str>,
) -> Result<ValidGeometry, GeometryError> {
    if let Some(crs) = crs.filter(|c| !is_wgs84(c)) {
        return Err(GeometryError::UnsupportedCrs {
            crs: crs.to_string(),
        });
    }

    let geojson: geojson::Geometry =
        serde_json::from_value(raw.clone()).map_err(|e| GeometryError::Parse {
            message: e.to_string(),
        })?;

    validate_parsed(geojson)
}

/// Parses stored `GeoJSON` geometry text.
///
/// # Errors
///
/// Returns [`GeometryError`] if the text is not a valid geometry.
pub fn parse_stored(text: &str) -> Result<ValidGeometry, GeometryError> {
    let geojson: geojson::Geometry =
        serde_json::from_str(text).map_err(|e| GeometryError::Parse {
            message: e.to_string(),
        })?;

    validate_parsed(geojson)
}

fn validate_parsed(geojson: geojson::Geometry) -> Result<ValidGeometry, GeometryError> {
    check_value(&geojson.value)?;

    let type_name = type_name(&geojson.value);
    let geo: geo::Geometry<f64> =
        geojson
            .clone()
            .try_into()
            .map_err(|e: geojson::Error| GeometryError::Parse {
                message: e.to_string(),
            })?;

    let point = geo.centroid().ok_or(GeometryError::Empty)?;

    Ok(ValidGeometry {
        geojson,
        geo,
        type_name,
        centroid: Centroid {
            longitude: point.x(),
            latitude: point.y(),
        },
    })
}

/// Returns the `GeoJSON` type name of a geometry value.
#[must_use]
pub const fn type_name(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn check_value(value: &geojson::Value) -> Result<(), GeometryError> {
    match value {
        geojson::Value::Point(position) => check_position(position),
        geojson::Value::MultiPoint(points) => {
            non_empty(points)?;
            points.iter().try_for_each(|p| check_position(p))
        }
        geojson::Value::LineString(line) => check_line(line),
        geojson::Value::MultiLineString(lines) => {
            non_empty(lines)?;
            lines.iter().try_for_each(|l| check_line(l))
        }
        geojson::Value::Polygon(rings) => check_polygon(rings),
        geojson::Value::MultiPolygon(polygons) => {
            non_empty(polygons)?;
            polygons.iter().try_for_each(|p| check_polygon(p))
        }
        geojson::Value::GeometryCollection(geometries) => {
            non_empty(geometries)?;
            geometries.iter().try_for_each(|g| check_value(&g.value))
        }
    }
}

const fn non_empty<T>(items: &[T]) -> Result<(), GeometryError> {
    if items.is_empty() {
        Err(GeometryError::Empty)
    } else {
        Ok(())
    }
}

fn check_position(position: &[f64]) -> Result<(), GeometryError> {
    let (Some(&lon), Some(&lat)) = (position.first(), position.get(1)) else {
        return Err(GeometryError::Parse {
            message: format!("position has {} value(s)", position.len()),
        });
    };

    if !position.iter().all(|v| v.is_finite()) {
        return Err(GeometryError::NonFiniteCoordinate);
    }
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(GeometryError::CoordinateOutOfRange { lon, lat });
    }

    Ok(())
}

fn check_line(line: &[Vec<f64>]) -> Result<(), GeometryError> {
    non_empty(line)?;
    if line.len() < 2 {
        return Err(GeometryError::TooFewPositions {
            expected: 2,
            found: line.len(),
        });
    }
    line.iter().try_for_each(|p| check_position(p))
}

fn check_polygon(rings: &[Vec<Vec<f64>>]) -> Result<(), GeometryError> {
    non_empty(rings)?;

    for ring in rings {
        non_empty(ring)?;
        if ring.len() < 4 {
            return Err(GeometryError::TooFewPositions {
                expected: 4,
                found: ring.len(),
            });
        }
        ring.iter().try_for_each(|p| check_position(p))?;
        if ring.first() != ring.last() {
            return Err(GeometryError::UnclosedRing);
        }
    }

    Ok(())
}

/// Returns `true` if the CRS name denotes WGS84 longitude/latitude.
///
/// The name is split on non-alphanumeric characters and a whole token must
/// be one of the WGS84 codes, so `EPSG:4326` matches and `EPSG:43260` does
/// not. `WGS 84` is accepted as two adjacent tokens.
#[must_use]
pub fn is_wgs84(crs: &str) -> bool {
    let upper = crs.to_ascii_uppercase();
    let tokens: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    tokens.iter().any(|t| WGS84_CODES.contains(t)) || tokens.windows(2).any(|w| w == ["WGS", "84"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[29.0, 41.0], [29.1, 41.0], [29.1, 41.1], [29.0, 41.1], [29.0, 41.0]]]
        })
    }

    #[test]
    fn valid_polygon_has_centroid() {
        let geometry = validate(&square(), None).unwrap();
        assert_eq!(geometry.type_name, "Polygon");
        assert!((geometry.centroid.longitude - 29.05).abs() < 1e-9);
        assert!((geometry.centroid.latitude - 41.05).abs() < 1e-9);
    }

    #[test]
    fn accepts_wgs84_crs_names() {
        for crs in [
            "urn:ogc:def:crs:OGC:1.3:CRS84",
            "EPSG:4326",
            "urn:ogc:def:crs:EPSG::4326",
        ] {
            assert!(is_wgs84(crs));
            assert!(validate(&square(), Some(crs)).is_ok());
        }
    }

    #[test]
    fn crs_codes_match_whole_tokens() {
        assert!(is_wgs84("WGS 84"));
        assert!(is_wgs84("http://www.opengis.net/def/crs/EPSG/0/4326"));
        for crs in ["EPSG:43260", "EPSG:14326", "urn:ogc:def:crs:OGC:1.3:CRS840"] {
            assert!(!is_wgs84(crs), "{crs}");
            assert!(matches!(
                validate(&square(), Some(crs)),
                Err(GeometryError::UnsupportedCrs { .. })
            ));
        }
    }

    #[test]
    fn rejects_projected_crs() {
        assert!(matches!(
            validate(&square(), Some("urn:ogc:def:crs:EPSG::3857")),
            Err(GeometryError::UnsupportedCrs { .. })
        ));
    }

    #[test]
    fn rejects_unclosed_ring() {
        let raw = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[29.0, 41.0], [29.1, 41.0], [29.1, 41.1], [29.0, 41.1]]]
        });
        assert!(matches!(
            validate(&raw, None),
            Err(GeometryError::UnclosedRing)
        ));
    }

    #[test]
    fn rejects_short_ring() {
        let raw = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[29.0, 41.0], [29.1, 41.0], [29.0, 41.0]]]
        });
        assert!(matches!(
            validate(&raw, None),
            Err(GeometryError::TooFewPositions {
                expected: 4,
                found: 3
            })
        ));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let raw = serde_json::json!({"type": "Point", "coordinates": [200.0, 41.0]});
        assert!(matches!(
            validate(&raw, None),
            Err(GeometryError::CoordinateOutOfRange { .. })
        ));

        let raw = serde_json::json!({"type": "Point", "coordinates": [29.0, -91.0]});
        assert!(matches!(
            validate(&raw, None),
            Err(GeometryError::CoordinateOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_empty_and_unparseable() {
        let raw = serde_json::json!({"type": "MultiPolygon", "coordinates": []});
        assert!(matches!(validate(&raw, None), Err(GeometryError::Empty)));

        let raw = serde_json::json!({"type": "Circle", "radius": 3});
        assert!(matches!(
            validate(&raw, None),
            Err(GeometryError::Parse { .. })
        ));

        let raw = serde_json::json!({"type": "Point", "coordinates": [29.0]});
        assert!(matches!(
            validate(&raw, None),
            Err(GeometryError::Parse { .. })
        ));
    }

    #[test]
    fn stored_text_round_trips() {
        let geometry = validate(&square(), None).unwrap();
        let text = serde_json::to_string(&geometry.geojson).unwrap();
        let parsed = parse_stored(&text).unwrap();
        assert_eq!(parsed.geojson, geometry.geojson);
        assert_eq!(parsed.centroid, geometry.centroid);
    }
}
