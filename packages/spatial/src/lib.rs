#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index over stored feature geometries.
//!
//! Loads every feature geometry from the store, builds an R-tree over
//! their bounding boxes, and answers radius, nearest-neighbor, and
//! intersection queries. Bounding boxes only prefilter candidates; every
//! answer is confirmed against the exact geometry using geodesic distance
//! on the WGS84 ellipsoid.

pub mod geodesic;

use geo::{BoundingRect, Geometry, Intersects, Point};
use hazard_map_database::{FeatureStore, StoreError, geometry};
use rstar::{AABB, RTree, RTreeObject};

/// Radius of the first search ring used by [`SpatialIndex::nearest`].
const NEAREST_INITIAL_RADIUS_KM: f64 = 1.0;

/// No two points on Earth are further apart than this (km).
const MAX_SURFACE_DISTANCE_KM: f64 = 20_100.0;

/// A feature geometry stored in the R-tree with its id.
struct IndexedGeometry {
    id: i64,
    envelope: AABB<[f64; 2]>,
    geometry: Geometry<f64>,
}

impl RTreeObject for IndexedGeometry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over feature geometry envelopes.
pub struct SpatialIndex {
    tree: RTree<IndexedGeometry>,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("len", &self.len())
            .finish()
    }
}

impl SpatialIndex {
    /// Loads every stored geometry and builds the R-tree.
    ///
    /// Geometries that no longer parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the geometries cannot be read.
    pub fn load(store: &FeatureStore) -> Result<Self, StoreError> {
        let mut entries = Vec::new();

        for (id, text) in store.geometries()? {
            match geometry::parse_stored(&text) {
                Ok(valid) => entries.push((id, valid.geo)),
                Err(e) => log::warn!("Failed to parse stored geometry for feature {id}: {e}"),
            }
        }

        let index = Self::from_geometries(entries);
        log::debug!("Loaded {} feature geometries into spatial index", index.len());

        Ok(index)
    }

    /// Builds an index from `(id, geometry)` pairs.
    #[must_use]
    pub fn from_geometries(entries: impl IntoIterator<Item = (i64, Geometry<f64>)>) -> Self {
        let entries = entries
            .into_iter()
            .filter_map(|(id, geometry)| {
                let envelope = compute_envelope(&geometry)?;
                Some(IndexedGeometry {
                    id,
                    envelope,
                    geometry,
                })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed geometries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids and distances (km) of geometries within `radius_km` of `center`,
    /// ordered by id.
    #[must_use]
    pub fn within_distance(&self, center: Point<f64>, radius_km: f64) -> Vec<(i64, f64)> {
        let (min, max) = geodesic::degree_envelope(center, radius_km);
        let query = AABB::from_corners(min, max);

        let mut hits: Vec<(i64, f64)> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .filter_map(|entry| {
                let distance = geodesic::distance_km(center, &entry.geometry);
                (distance <= radius_km).then_some((entry.id, distance))
            })
            .collect();

        hits.sort_by_key(|(id, _)| *id);
        hits
    }

    /// The `limit` geometries closest to `center` as `(id, distance_km)`,
    /// ascending by distance with ties broken by id.
    ///
    /// Searches rings of doubling radius until enough geometries are inside
    /// one. Everything inside the final ring is exact, so its closest
    /// `limit` entries are the true nearest.
    #[must_use]
    pub fn nearest(&self, center: Point<f64>, limit: usize) -> Vec<(i64, f64)> {
        let wanted = limit.min(self.len());
        if wanted == 0 {
            return Vec::new();
        }

        let mut radius = NEAREST_INITIAL_RADIUS_KM;
        let mut hits = loop {
            let hits = self.within_distance(center, radius);
            if hits.len() >= wanted || radius >= MAX_SURFACE_DISTANCE_KM {
                break hits;
            }
            radius = (radius * 2.0).min(MAX_SURFACE_DISTANCE_KM);
        };

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.truncate(wanted);
        hits
    }

    /// Ids of geometries that share at least one point with `query`,
    /// ordered by id.
    #[must_use]
    pub fn intersecting(&self, query: &Geometry<f64>) -> Vec<i64> {
        let Some(envelope) = compute_envelope(query) else {
            return Vec::new();
        };

        let mut ids: Vec<i64> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|entry| entry.geometry.intersects(query))
            .map(|entry| entry.id)
            .collect();

        ids.sort_unstable();
        ids
    }
}

/// Compute the bounding box envelope for a geometry. `None` for empty
/// geometries.
fn compute_envelope(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    geometry
        .bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

#[cfg(test)]
mod tests {
    use geo::{Rect, coord};
    use hazard_map_database_models::{FeatureInput, Provenance};

    use super::*;

    fn square(lon: f64, lat: f64) -> Geometry<f64> {
        Geometry::Rect(Rect::new(
            coord! { x: lon, y: lat },
            coord! { x: lon + 0.01, y: lat + 0.01 },
        ))
    }

    fn row_index() -> SpatialIndex {
        // Five squares marching east along latitude 41.
        SpatialIndex::from_geometries(
            (0_i32..5).map(|i| (i64::from(i) + 1, square(f64::from(i).mul_add(0.1, 29.0), 41.0))),
        )
    }

    #[test]
    fn within_distance_is_ordered_by_id() {
        let index = row_index();
        let hits = index.within_distance(Point::new(29.205, 41.005), 10.0);
        let ids: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(hits.iter().all(|(_, d)| *d <= 10.0));
    }

    #[test]
    fn radius_results_grow_monotonically() {
        let index = row_index();
        let center = Point::new(28.9, 41.0);
        let mut previous: Vec<i64> = Vec::new();

        for radius in [0.0, 5.0, 10.0, 20.0, 40.0, 80.0] {
            let ids: Vec<i64> = index
                .within_distance(center, radius)
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            assert!(previous.iter().all(|id| ids.contains(id)));
            previous = ids;
        }

        assert_eq!(previous.len(), 5);
    }

    #[test]
    fn nearest_returns_closest_first() {
        let index = row_index();
        let hits = index.nearest(Point::new(29.405, 41.005), 3);
        let ids: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert!(hits[0].1.abs() < f64::EPSILON);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn nearest_caps_at_index_size() {
        let index = row_index();
        assert_eq!(index.nearest(Point::new(0.0, 0.0), 50).len(), 5);
        assert!(index.nearest(Point::new(0.0, 0.0), 0).is_empty());
        assert!(SpatialIndex::from_geometries(Vec::new())
            .nearest(Point::new(0.0, 0.0), 3)
            .is_empty());
    }

    #[test]
    fn nearest_breaks_ties_by_id() {
        let point = Geometry::Point(Point::new(29.0, 41.0));
        let index = SpatialIndex::from_geometries(vec![(9, point.clone()), (3, point)]);
        let ids: Vec<i64> = index
            .nearest(Point::new(29.0, 41.1), 2)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![3, 9]);
    }

    #[test]
    fn intersecting_matches_overlaps_only() {
        let index = row_index();
        let query = Geometry::Rect(Rect::new(
            coord! { x: 29.005, y: 41.005 },
            coord! { x: 29.105, y: 41.02 },
        ));
        assert_eq!(index.intersecting(&query), vec![1, 2]);

        let far = Geometry::Point(Point::new(10.0, 10.0));
        assert!(index.intersecting(&far).is_empty());
    }

    #[test]
    fn load_reads_store_geometries() {
        let store = FeatureStore::open_in_memory().unwrap();
        for lon in [29.0, 30.0] {
            let input = FeatureInput::new(
                serde_json::json!({"type": "Point", "coordinates": [lon, 41.0]}),
                serde_json::Map::new(),
            );
            store.create(&input, &Provenance::default()).unwrap();
        }

        let index = SpatialIndex::load(&store).unwrap();
        assert_eq!(index.len(), 2);
    }
}
