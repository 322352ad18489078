//! Ring winding normalization.
//!
//! Every ring of every polygon is wound counter-clockwise, holes included.
//! Each ring is oriented on its own; their order within the polygon is kept.

use geo::{Geometry, MultiPolygon, Polygon, Winding};

/// Orients all polygon rings of `geometry` counter-clockwise.
pub(crate) fn orient(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Polygon(polygon) => Geometry::Polygon(orient_polygon(polygon)),
        Geometry::MultiPolygon(multi) => Geometry::MultiPolygon(MultiPolygon::new(
            multi.0.into_iter().map(orient_polygon).collect(),
        )),
        other => other,
    }
}

fn orient_polygon(polygon: Polygon<f64>) -> Polygon<f64> {
    let (mut exterior, mut interiors) = polygon.into_inner();
    exterior.make_ccw_winding();
    for hole in &mut interiors {
        hole.make_ccw_winding();
    }
    Polygon::new(exterior, interiors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, Area, LineString};

    fn signed_area(ring: &LineString<f64>) -> f64 {
        Polygon::new(ring.clone(), vec![]).signed_area()
    }

    #[test]
    fn test_exterior_and_holes_counter_clockwise() {
        let cw_shell = line_string![
            (x: 0.0, y: 0.0), (x: 0.0, y: 10.0), (x: 10.0, y: 10.0), (x: 10.0, y: 0.0), (x: 0.0, y: 0.0)
        ];
        let ccw_hole = line_string![
            (x: 2.0, y: 2.0), (x: 4.0, y: 2.0), (x: 4.0, y: 4.0), (x: 2.0, y: 4.0), (x: 2.0, y: 2.0)
        ];
        let cw_hole = line_string![
            (x: 6.0, y: 6.0), (x: 6.0, y: 8.0), (x: 8.0, y: 8.0), (x: 8.0, y: 6.0), (x: 6.0, y: 6.0)
        ];

        let oriented = orient(Geometry::Polygon(Polygon::new(
            cw_shell,
            vec![ccw_hole.clone(), cw_hole],
        )));
        let Geometry::Polygon(polygon) = oriented else {
            panic!("expected polygon");
        };

        assert!(signed_area(polygon.exterior()) > 0.0);
        for hole in polygon.interiors() {
            assert!(signed_area(hole) > 0.0);
        }
        // Already counter-clockwise rings are untouched.
        assert_eq!(polygon.interiors()[0], ccw_hole);
    }

    #[test]
    fn test_multipolygon_each_part() {
        let cw = line_string![
            (x: 0.0, y: 0.0), (x: 0.0, y: 1.0), (x: 1.0, y: 1.0), (x: 1.0, y: 0.0), (x: 0.0, y: 0.0)
        ];
        let cw_far = line_string![
            (x: 5.0, y: 5.0), (x: 5.0, y: 6.0), (x: 6.0, y: 6.0), (x: 6.0, y: 5.0), (x: 5.0, y: 5.0)
        ];
        let multi = MultiPolygon::new(vec![Polygon::new(cw, vec![]), Polygon::new(cw_far, vec![])]);

        let Geometry::MultiPolygon(oriented) = orient(Geometry::MultiPolygon(multi)) else {
            panic!("expected multipolygon");
        };
        for polygon in &oriented.0 {
            assert!(signed_area(polygon.exterior()) > 0.0);
        }
    }

    #[test]
    fn test_other_geometries_unchanged() {
        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 1.0)]);
        assert_eq!(orient(line.clone()), line);
    }
}
