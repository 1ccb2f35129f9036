#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial and aggregate queries over the feature store.
//!
//! [`QueryEngine`] borrows a [`FeatureStore`] session and keeps an
//! in-memory [`SpatialIndex`] over its geometries. The index is rebuilt
//! lazily whenever the store's revision has moved since it was built, so
//! features created after the engine was constructed are always visible.

use std::cell::RefCell;

use geo::Point;
use hazard_map_database::{FeatureStore, GeometryError, StoreError, geometry};
use hazard_map_database_models::{DistrictStatistics, Feature};
use hazard_map_spatial::SpatialIndex;

/// Errors that can occur while answering a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The query geometry or center point is invalid.
    #[error("Invalid query geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// The radius is negative or not finite.
    #[error("Invalid radius: {radius_km} km")]
    InvalidRadius {
        /// The rejected radius.
        radius_km: f64,
    },
}

/// Answers queries against one store session.
pub struct QueryEngine<'a> {
    store: &'a FeatureStore,
    index: RefCell<Option<(u64, SpatialIndex)>>,
}

impl std::fmt::Debug for QueryEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<'a> QueryEngine<'a> {
    /// Creates an engine over `store`. The spatial index is built on first
    /// use.
    #[must_use]
    pub const fn new(store: &'a FeatureStore) -> Self {
        Self {
            store,
            index: RefCell::new(None),
        }
    }

    /// The underlying store session.
    #[must_use]
    pub const fn store(&self) -> &'a FeatureStore {
        self.store
    }

    /// Features whose geodesic distance from `center` is at most
    /// `radius_km`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidRadius`] for a negative or non-finite
    /// radius, [`QueryError::Geometry`] for an invalid center, or
    /// [`QueryError::Store`] if reading fails.
    pub fn within_radius(
        &self,
        center: Point<f64>,
        radius_km: f64,
    ) -> Result<Vec<Feature>, QueryError> {
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(QueryError::InvalidRadius { radius_km });
        }
        check_center(center)?;

        let hits = self.with_index(|index| index.within_distance(center, radius_km))?;
        log::debug!(
            "{} feature(s) within {radius_km} km of ({}, {})",
            hits.len(),
            center.x(),
            center.y()
        );

        hits.into_iter()
            .map(|(id, _)| Ok(self.store.get_by_id(id)?))
            .collect()
    }

    /// The `limit` features closest to `center`, with their distance in
    /// kilometres. Ascending by distance, ties broken by id. Returns fewer
    /// than `limit` only when the store holds fewer features.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Geometry`] for an invalid center or
    /// [`QueryError::Store`] if reading fails.
    pub fn nearest(
        &self,
        center: Point<f64>,
        limit: usize,
    ) -> Result<Vec<(Feature, f64)>, QueryError> {
        check_center(center)?;

        let hits = self.with_index(|index| index.nearest(center, limit))?;

        hits.into_iter()
            .map(|(id, distance)| Ok((self.store.get_by_id(id)?, distance)))
            .collect()
    }

    /// Features whose geometry shares at least one point with the given
    /// `GeoJSON` geometry, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Geometry`] if the query geometry is invalid or
    /// [`QueryError::Store`] if reading fails.
    pub fn intersects(&self, query: &serde_json::Value) -> Result<Vec<Feature>, QueryError> {
        let query = geometry::validate(query, None)?;
        let ids = self.with_index(|index| index.intersecting(&query.geo))?;

        ids.into_iter()
            .map(|id| Ok(self.store.get_by_id(id)?))
            .collect()
    }

    /// Aggregate risk, population, and building figures for features whose
    /// district contains `query`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] if the aggregate query fails.
    pub fn district_statistics(&self, query: &str) -> Result<DistrictStatistics, QueryError> {
        Ok(self.store.district_aggregate(query)?)
    }

    /// Features whose composite risk score is at least `threshold`,
    /// highest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] if the query fails.
    pub fn high_risk_areas(&self, threshold: f64) -> Result<Vec<Feature>, QueryError> {
        Ok(self.store.high_risk(threshold)?)
    }

    /// One feature as a `GeoJSON` Feature whose id is the store id.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] wrapping [`StoreError::NotFound`] if
    /// the id does not exist.
    pub fn as_geojson(&self, id: i64) -> Result<geojson::Feature, QueryError> {
        Ok(to_geojson(&self.store.get_by_id(id)?))
    }

    /// A page of features, in id order, as a `GeoJSON` `FeatureCollection`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] if the query fails.
    pub fn as_geojson_collection(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<geojson::FeatureCollection, QueryError> {
        let features = self
            .store
            .list(offset, limit)?
            .iter()
            .map(to_geojson)
            .collect();

        Ok(geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }

    fn with_index<T>(&self, query: impl FnOnce(&SpatialIndex) -> T) -> Result<T, QueryError> {
        let revision = self.store.revision();
        let mut cached = self.index.borrow_mut();

        match &mut *cached {
            Some((built, index)) if *built == revision => Ok(query(index)),
            slot => {
                log::debug!("Rebuilding spatial index at store revision {revision}");
                let (_, index) = slot.insert((revision, SpatialIndex::load(self.store)?));
                Ok(query(index))
            }
        }
    }
}

fn check_center(center: Point<f64>) -> Result<(), GeometryError> {
    let (lon, lat) = (center.x(), center.y());

    if !lon.is_finite() || !lat.is_finite() {
        return Err(GeometryError::NonFiniteCoordinate);
    }
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(GeometryError::CoordinateOutOfRange { lon, lat });
    }

    Ok(())
}

/// Re-serializes a stored feature: stored geometry, raw properties plus
/// any prediction fields, and the store id as the feature id.
fn to_geojson(feature: &Feature) -> geojson::Feature {
    geojson::Feature {
        bbox: None,
        geometry: Some(feature.geometry.clone()),
        id: Some(geojson::feature::Id::Number(feature.id.into())),
        properties: Some(feature.output_properties()),
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use hazard_map_database_models::{FeatureInput, Prediction, Provenance};

    use super::*;

    fn point(lon: f64, lat: f64, name: &str) -> FeatureInput {
        FeatureInput::new(
            serde_json::json!({"type": "Point", "coordinates": [lon, lat]}),
            serde_json::json!({"Name": name, "ilce_adi": "Kadikoy", "bilesik_risk_skoru": 0.5})
                .as_object()
                .cloned()
                .unwrap(),
        )
    }

    /// A 5x5 grid of points 0.05 degrees apart, ids in row-major order.
    fn grid(store: &FeatureStore) -> Vec<Feature> {
        let mut features = Vec::new();
        for row in 0_i32..5 {
            for col in 0_i32..5 {
                let lon = f64::from(col).mul_add(0.05, 29.0);
                let lat = f64::from(row).mul_add(0.05, 41.0);
                features.push(
                    store
                        .create(&point(lon, lat, &format!("P{row}{col}")), &Provenance::default())
                        .unwrap(),
                );
            }
        }
        features
    }

    #[test]
    fn nearest_matches_brute_force() {
        let store = FeatureStore::open_in_memory().unwrap();
        let features = grid(&store);
        let engine = QueryEngine::new(&store);
        let center = Point::new(29.07, 41.11);

        let mut expected: Vec<(i64, f64)> = features
            .iter()
            .map(|f| {
                let geometry = geometry::parse_stored(&serde_json::to_string(&f.geometry).unwrap())
                    .unwrap()
                    .geo;
                (f.id, hazard_map_spatial::geodesic::distance_km(center, &geometry))
            })
            .collect();
        expected.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        for limit in [1, 4, 10, 25, 40] {
            let got: Vec<i64> = engine
                .nearest(center, limit)
                .unwrap()
                .iter()
                .map(|(f, _)| f.id)
                .collect();
            let want: Vec<i64> = expected.iter().take(limit).map(|(id, _)| *id).collect();
            assert_eq!(got, want, "limit {limit}");
        }
    }

    #[test]
    fn nearest_distances_ascend() {
        let store = FeatureStore::open_in_memory().unwrap();
        grid(&store);
        let engine = QueryEngine::new(&store);

        let results = engine.nearest(Point::new(29.1, 41.1), 6).unwrap();
        assert_eq!(results.len(), 6);
        assert!(results[0].1.abs() < f64::EPSILON);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn radius_is_monotonic_and_bounded() {
        let store = FeatureStore::open_in_memory().unwrap();
        grid(&store);
        let engine = QueryEngine::new(&store);
        let center = Point::new(29.1, 41.1);

        let mut previous: Vec<i64> = Vec::new();
        for radius in [0.0, 3.0, 5.0, 6.0, 10.0, 20.0, 50.0] {
            let found: Vec<i64> = engine
                .within_radius(center, radius)
                .unwrap()
                .iter()
                .map(|f| f.id)
                .collect();
            assert!(found.windows(2).all(|w| w[0] < w[1]));
            assert!(previous.iter().all(|id| found.contains(id)));
            previous = found;
        }

        assert_eq!(previous.len(), 25);
        assert_eq!(engine.within_radius(center, 0.0).unwrap().len(), 1);
    }

    #[test]
    fn invalid_radius_and_center_are_rejected() {
        let store = FeatureStore::open_in_memory().unwrap();
        let engine = QueryEngine::new(&store);

        assert!(matches!(
            engine.within_radius(Point::new(29.0, 41.0), -1.0),
            Err(QueryError::InvalidRadius { .. })
        ));
        assert!(matches!(
            engine.within_radius(Point::new(29.0, 41.0), f64::NAN),
            Err(QueryError::InvalidRadius { .. })
        ));
        assert!(matches!(
            engine.nearest(Point::new(200.0, 41.0), 1),
            Err(QueryError::Geometry(_))
        ));
    }

    #[test]
    fn index_sees_features_created_later() {
        let store = FeatureStore::open_in_memory().unwrap();
        let engine = QueryEngine::new(&store);
        let center = Point::new(29.0, 41.0);

        assert!(engine.nearest(center, 1).unwrap().is_empty());

        let created = store
            .create(&point(29.0, 41.0, "Late"), &Provenance::default())
            .unwrap();
        let nearest = engine.nearest(center, 1).unwrap();
        assert_eq!(nearest[0].0.id, created.id);
    }

    #[test]
    fn intersects_polygon_query() {
        let store = FeatureStore::open_in_memory().unwrap();
        let features = grid(&store);
        let engine = QueryEngine::new(&store);

        // Covers columns 0-1 of rows 0-1.
        let query = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[28.99, 40.99], [29.06, 40.99], [29.06, 41.06], [28.99, 41.06], [28.99, 40.99]]]
        });
        let ids: Vec<i64> = engine
            .intersects(&query)
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(
            ids,
            vec![features[0].id, features[1].id, features[5].id, features[6].id]
        );

        let invalid = serde_json::json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 1.0]]]});
        assert!(matches!(
            engine.intersects(&invalid),
            Err(QueryError::Geometry(_))
        ));
    }

    #[test]
    fn geojson_output_merges_prediction() {
        let store = FeatureStore::open_in_memory().unwrap();
        let created = store
            .create(&point(29.0, 41.0, "Moda"), &Provenance::default())
            .unwrap();
        let engine = QueryEngine::new(&store);

        let before = engine.as_geojson(created.id).unwrap();
        assert_eq!(
            before.id,
            Some(geojson::feature::Id::Number(created.id.into()))
        );
        assert_eq!(before.properties.as_ref(), Some(&created.properties));

        store
            .annotate_prediction(
                created.id,
                &Prediction {
                    score: 4.0,
                    probabilities: Some(vec![0.1, 0.9]),
                },
            )
            .unwrap();

        let after = engine.as_geojson(created.id).unwrap();
        let properties = after.properties.unwrap();
        assert_eq!(properties["predicted_risk_score"], serde_json::json!(4.0));
        assert_eq!(properties["prediction_confidence"], serde_json::json!(0.9));
        assert!(properties.contains_key("prediction_timestamp"));
        assert_eq!(properties["Name"], serde_json::json!("Moda"));
        assert_eq!(after.geometry, before.geometry);

        assert!(matches!(
            engine.as_geojson(created.id + 1),
            Err(QueryError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[test]
    fn geojson_collection_pages() {
        let store = FeatureStore::open_in_memory().unwrap();
        let features = grid(&store);
        let engine = QueryEngine::new(&store);

        let page = engine.as_geojson_collection(20, 10).unwrap();
        assert_eq!(page.features.len(), 5);
        assert_eq!(
            page.features[0].id,
            Some(geojson::feature::Id::Number(features[20].id.into()))
        );
    }

    #[test]
    fn district_statistics_delegate() {
        let store = FeatureStore::open_in_memory().unwrap();
        grid(&store);
        let engine = QueryEngine::new(&store);

        let stats = engine.district_statistics("KADIKOY").unwrap();
        assert_eq!(stats.neighborhood_count, 25);
        assert!((stats.average_risk - 0.5).abs() < 1e-9);
        assert_eq!(engine.high_risk_areas(0.6).unwrap().len(), 0);
        assert_eq!(engine.high_risk_areas(0.5).unwrap().len(), 25);
    }
}
