//! Geodesic distance on the WGS84 ellipsoid.
//!
//! Point-to-geometry distance is 0 when the geometry covers the point.
//! Otherwise it is the geodesic distance to the closest vertex or segment
//! point. The closest point on each segment is first located in a local
//! equirectangular projection centred on the query point and measured
//! geodesically. That measurement is an upper bound, so segments that may
//! hold the minimum are refined by a golden-section search along the
//! segment.

use geo::{Coord, Distance, Geodesic, Geometry, Intersects, Line, Point};

/// Mean length of one degree of latitude at the equator (km). Meridian
/// degrees are never shorter than this.
const KM_PER_DEGREE_LAT_MIN: f64 = 110.574;

/// Length of one degree of longitude at the equator (km).
const KM_PER_DEGREE_LON_EQUATOR: f64 = 111.320;

/// Slack applied to the degree envelope so rounding never drops a
/// candidate at the boundary.
const ENVELOPE_MARGIN: f64 = 1.05;

/// A segment is refined when its projected estimate is within this factor
/// of the best distance so far.
const REFINE_SLACK: f64 = 1.01;

/// Golden-section iterations per refined segment. Shrinks the bracket to
/// about 1e-10 of the segment length.
const GOLDEN_SECTION_STEPS: usize = 48;

/// Geodesic distance between two points in kilometres.
#[must_use]
pub fn point_distance_km(a: Point<f64>, b: Point<f64>) -> f64 {
    Geodesic.distance(a, b) / 1000.0
}

/// Geodesic distance from a point to the closest point of a geometry in
/// kilometres.
#[must_use]
pub fn distance_km(point: Point<f64>, geometry: &Geometry<f64>) -> f64 {
    if geometry.intersects(&point) {
        return 0.0;
    }

    let mut best = f64::INFINITY;
    visit_segments(geometry, &mut |line| {
        best = best.min(segment_distance_km(point, line, best));
    });

    best
}

/// Geodesic distance from `point` to `line`. Segments whose projected
/// estimate cannot come close to `best` keep the estimate.
fn segment_distance_km(point: Point<f64>, line: Line<f64>, best: f64) -> f64 {
    let estimate = point_distance_km(point, closest_point(point, line));
    if line.start == line.end || estimate > best * REFINE_SLACK {
        return estimate;
    }

    let refined = minimize_on_unit(|t| point_distance_km(point, interpolate(line, t)));
    refined.min(estimate)
}

/// Golden-section minimum of `f` over [0, 1]. `f` is assumed unimodal,
/// which holds for distance along a single segment.
fn minimize_on_unit(f: impl Fn(f64) -> f64) -> f64 {
    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    let mut c = (-inv_phi).mul_add(hi - lo, hi);
    let mut d = inv_phi.mul_add(hi - lo, lo);
    let (mut fc, mut fd) = (f(c), f(d));

    for _ in 0..GOLDEN_SECTION_STEPS {
        if fc < fd {
            hi = d;
            d = c;
            fd = fc;
            c = (-inv_phi).mul_add(hi - lo, hi);
            fc = f(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = inv_phi.mul_add(hi - lo, lo);
            fd = f(d);
        }
    }

    fc.min(fd).min(f(0.0)).min(f(1.0))
}

/// The point at fraction `t` along `line`, interpolated in lon/lat.
fn interpolate(line: Line<f64>, t: f64) -> Point<f64> {
    Point::new(
        t.mul_add(line.end.x - line.start.x, line.start.x),
        t.mul_add(line.end.y - line.start.y, line.start.y),
    )
}

/// A lon/lat box guaranteed to contain every point within `radius_km` of
/// `center`. Returns `([min_lon, min_lat], [max_lon, max_lat])`.
///
/// Near the poles, or when the box would cross the antimeridian, the full
/// longitude range is returned.
#[must_use]
pub fn degree_envelope(center: Point<f64>, radius_km: f64) -> ([f64; 2], [f64; 2]) {
    let dlat = radius_km / KM_PER_DEGREE_LAT_MIN * ENVELOPE_MARGIN;
    let min_lat = (center.y() - dlat).max(-90.0);
    let max_lat = (center.y() + dlat).min(90.0);

    let widest = min_lat.abs().max(max_lat.abs());
    let cos = widest.to_radians().cos();

    let (min_lon, max_lon) = if cos <= f64::EPSILON {
        (-180.0, 180.0)
    } else {
        let dlon = radius_km / (KM_PER_DEGREE_LON_EQUATOR * cos) * ENVELOPE_MARGIN;
        let min_lon = center.x() - dlon;
        let max_lon = center.x() + dlon;
        if min_lon < -180.0 || max_lon > 180.0 {
            (-180.0, 180.0)
        } else {
            (min_lon, max_lon)
        }
    };

    ([min_lon, min_lat], [max_lon, max_lat])
}

/// Calls `visit` for every segment of the geometry. Points are visited as
/// zero-length segments.
fn visit_segments(geometry: &Geometry<f64>, visit: &mut impl FnMut(Line<f64>)) {
    match geometry {
        Geometry::Point(p) => visit(Line::new(p.0, p.0)),
        Geometry::MultiPoint(mp) => {
            for p in mp {
                visit(Line::new(p.0, p.0));
            }
        }
        Geometry::Line(line) => visit(*line),
        Geometry::LineString(ls) => {
            if let [only] = ls.0.as_slice() {
                visit(Line::new(*only, *only));
            }
            ls.lines().for_each(&mut *visit);
        }
        Geometry::MultiLineString(mls) => {
            for ls in mls {
                ls.lines().for_each(&mut *visit);
            }
        }
        Geometry::Polygon(polygon) => {
            polygon.exterior().lines().for_each(&mut *visit);
            for ring in polygon.interiors() {
                ring.lines().for_each(&mut *visit);
            }
        }
        Geometry::MultiPolygon(mp) => {
            for polygon in mp {
                visit_segments(&Geometry::Polygon(polygon.clone()), visit);
            }
        }
        Geometry::GeometryCollection(collection) => {
            for g in collection {
                visit_segments(g, visit);
            }
        }
        Geometry::Rect(rect) => visit_segments(&Geometry::Polygon(rect.to_polygon()), visit),
        Geometry::Triangle(triangle) => {
            visit_segments(&Geometry::Polygon(triangle.to_polygon()), visit);
        }
    }
}

/// Closest point of `line` to `point`, found in an equirectangular
/// projection centred on `point`.
fn closest_point(point: Point<f64>, line: Line<f64>) -> Point<f64> {
    let scale = point.y().to_radians().cos();
    let project = |c: Coord<f64>| Coord {
        x: wrap_degrees(c.x - point.x()) * scale,
        y: c.y - point.y(),
    };

    let a = project(line.start);
    let b = project(line.end);
    let ab = Coord {
        x: b.x - a.x,
        y: b.y - a.y,
    };
    let length_sq = ab.x.mul_add(ab.x, ab.y * ab.y);

    if length_sq <= f64::EPSILON * f64::EPSILON {
        return Point::from(line.start);
    }

    // The query point is the projection origin, so the dot product is
    // taken against -a.
    let t = ((-a.x).mul_add(ab.x, -a.y * ab.y) / length_sq).clamp(0.0, 1.0);

    interpolate(line, t)
}

/// Normalizes a longitude difference into [-180, 180].
fn wrap_degrees(delta: f64) -> f64 {
    if delta > 180.0 {
        delta - 360.0
    } else if delta < -180.0 {
        delta + 360.0
    } else {
        delta
    }
}
