//! Topological validity checks.
//!
//! A geometry is accepted only when it is valid in the OGC simple-features
//! sense: rings are closed and simple, holes sit inside their shell without
//! crossing one another, and the parts of a multipolygon do not overlap.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Contains, Coord, Geometry, Line, LineString, Point, Polygon};

use stratum_common::{OrmError, OrmResult};

/// Validates `geometry`, returning a geometry error describing the first
/// defect found.
pub(crate) fn validate(geometry: &Geometry<f64>) -> OrmResult<()> {
    match geometry {
        Geometry::Point(p) => check_coord(p.0),
        Geometry::MultiPoint(mp) => mp.0.iter().try_for_each(|p| check_coord(p.0)),
        Geometry::LineString(line) => check_line(line),
        Geometry::MultiLineString(ml) => ml.0.iter().try_for_each(check_line),
        Geometry::Polygon(polygon) => check_polygon(polygon),
        Geometry::MultiPolygon(mp) => {
            mp.0.iter().try_for_each(check_polygon)?;
            for (i, a) in mp.0.iter().enumerate() {
                for b in &mp.0[i + 1..] {
                    if rings_cross(a.exterior(), b.exterior())
                        || contains_vertex(a, b.exterior())
                        || contains_vertex(b, a.exterior())
                    {
                        return Err(OrmError::geometry("multipolygon parts overlap"));
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_coord(coord: Coord<f64>) -> OrmResult<()> {
    if coord.x.is_finite() && coord.y.is_finite() {
        Ok(())
    } else {
        Err(OrmError::geometry(format!(
            "non-finite coordinate ({}, {})",
            coord.x, coord.y
        )))
    }
}

fn check_line(line: &LineString<f64>) -> OrmResult<()> {
    line.0.iter().copied().try_for_each(check_coord)?;
    if distinct(line).len() < 2 {
        return Err(OrmError::geometry(
            "line string needs at least two distinct points",
        ));
    }
    Ok(())
}

fn check_polygon(polygon: &Polygon<f64>) -> OrmResult<()> {
    check_ring(polygon.exterior())?;
    polygon.interiors().iter().try_for_each(check_ring)?;

    let shell = Polygon::new(polygon.exterior().clone(), vec![]);
    let holes: Vec<Polygon<f64>> = polygon
        .interiors()
        .iter()
        .map(|ring| Polygon::new(ring.clone(), vec![]))
        .collect();

    for hole in &holes {
        if !shell.contains(hole) || hole.unsigned_area() >= shell.unsigned_area() {
            return Err(OrmError::geometry("hole lies outside its shell"));
        }
    }

    for (i, a) in holes.iter().enumerate() {
        for b in &holes[i + 1..] {
            if rings_cross(a.exterior(), b.exterior()) {
                return Err(OrmError::geometry("holes cross each other"));
            }
            if contains_vertex(a, b.exterior()) || contains_vertex(b, a.exterior()) {
                return Err(OrmError::geometry("nested holes"));
            }
        }
    }
    Ok(())
}

fn check_ring(ring: &LineString<f64>) -> OrmResult<()> {
    ring.0.iter().copied().try_for_each(check_coord)?;
    if !ring.is_closed() {
        return Err(OrmError::geometry("ring is not closed"));
    }

    // Closed, so the first point appears twice.
    let points = distinct(ring);
    if points.len() < 4 {
        return Err(OrmError::geometry(
            "ring needs at least three distinct points",
        ));
    }

    let segments: Vec<Line<f64>> = points.windows(2).map(|w| Line::new(w[0], w[1])).collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                Some(LineIntersection::Collinear { .. }) => {
                    return Err(OrmError::geometry("ring has overlapping edges"));
                }
                Some(LineIntersection::SinglePoint { intersection, .. }) if !adjacent => {
                    return Err(OrmError::geometry(format!(
                        "ring self-intersects at ({}, {})",
                        intersection.x, intersection.y
                    )));
                }
                _ => {}
            }
        }
    }

    if Polygon::new(ring.clone(), vec![]).signed_area() == 0.0 {
        return Err(OrmError::geometry("ring has zero area"));
    }
    Ok(())
}

/// Drops consecutive duplicate points.
fn distinct(line: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut points: Vec<Coord<f64>> = Vec::with_capacity(line.0.len());
    for &coord in &line.0 {
        if points.last() != Some(&coord) {
            points.push(coord);
        }
    }
    points
}

/// True when two rings share an edge or cross at an interior point.
fn rings_cross(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    a.lines().any(|sa| {
        b.lines().any(|sb| {
            matches!(
                line_intersection(sa, sb),
                Some(LineIntersection::Collinear { .. })
                    | Some(LineIntersection::SinglePoint { is_proper: true, .. })
            )
        })
    })
}

/// True when a vertex of `ring` lies strictly inside `polygon`.
fn contains_vertex(polygon: &Polygon<f64>, ring: &LineString<f64>) -> bool {
    ring.0.iter().any(|c| polygon.contains(&Point::from(*c)))
}
