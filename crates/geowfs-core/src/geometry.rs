//! Geometry helpers over `geo-types`: axis swapping, envelopes and WKT.

use std::fmt;

use geo_types::{Coord, Geometry};
use geozero::ToWkt;
pub use wfs_csv::geospatial::parse_wkt;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    #[must_use]
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Grows the box to include `coord`.
    pub fn include(&mut self, coord: Coord<f64>) {
        self.min_x = self.min_x.min(coord.x);
        self.max_x = self.max_x.max(coord.x);
        self.min_y = self.min_y.min(coord.y);
        self.max_y = self.max_y.max(coord.y);
    }

    /// Grows the box to include `other`.
    pub fn merge(&mut self, other: &Extent) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
    }

    #[must_use]
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Whether this WGS84 box covers the whole world in longitude.
    #[must_use]
    pub fn is_whole_world(&self) -> bool {
        self.min_x <= -180.0 && self.max_x >= 180.0 && self.min_y <= -85.0 && self.max_y >= 85.0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) - ({}, {})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

fn visit_coords(geometry: &Geometry<f64>, f: &mut impl FnMut(Coord<f64>)) {
    match geometry {
        Geometry::Point(p) => f(p.0),
        Geometry::Line(l) => {
            f(l.start);
            f(l.end);
        },
        Geometry::LineString(ls) => ls.0.iter().copied().for_each(f),
        Geometry::Polygon(poly) => {
            poly.exterior().0.iter().copied().for_each(&mut *f);
            for ring in poly.interiors() {
                ring.0.iter().copied().for_each(&mut *f);
            }
        },
        Geometry::MultiPoint(mp) => mp.0.iter().for_each(|p| f(p.0)),
        Geometry::MultiLineString(mls) => {
            for ls in &mls.0 {
                ls.0.iter().copied().for_each(&mut *f);
            }
        },
        Geometry::MultiPolygon(mp) => {
            for poly in &mp.0 {
                visit_coords(&Geometry::Polygon(poly.clone()), f);
            }
        },
        Geometry::GeometryCollection(gc) => {
            for g in &gc.0 {
                visit_coords(g, f);
            }
        },
        Geometry::Rect(r) => {
            f(r.min());
            f(r.max());
        },
        Geometry::Triangle(t) => {
            f(t.v1());
            f(t.v2());
            f(t.v3());
        },
    }
}

fn swap(c: &mut Coord<f64>) {
    std::mem::swap(&mut c.x, &mut c.y);
}

/// Exchanges x and y of every coordinate.
pub fn swap_axes(geometry: &mut Geometry<f64>) {
    match geometry {
        Geometry::Point(p) => swap(&mut p.0),
        Geometry::Line(l) => {
            swap(&mut l.start);
            swap(&mut l.end);
        },
        Geometry::LineString(ls) => ls.0.iter_mut().for_each(swap),
        Geometry::Polygon(poly) => {
            poly.exterior_mut(|ring| ring.0.iter_mut().for_each(swap));
            poly.interiors_mut(|rings| {
                for ring in rings {
                    ring.0.iter_mut().for_each(swap);
                }
            });
        },
        Geometry::MultiPoint(mp) => mp.0.iter_mut().for_each(|p| swap(&mut p.0)),
        Geometry::MultiLineString(mls) => {
            for ls in &mut mls.0 {
                ls.0.iter_mut().for_each(swap);
            }
        },
        Geometry::MultiPolygon(mp) => {
            for poly in &mut mp.0 {
                let mut g = Geometry::Polygon(poly.clone());
                swap_axes(&mut g);
                if let Geometry::Polygon(swapped) = g {
                    *poly = swapped;
                }
            }
        },
        Geometry::GeometryCollection(gc) => gc.0.iter_mut().for_each(swap_axes),
        Geometry::Rect(r) => {
            let mut poly = Geometry::Polygon(r.to_polygon());
            swap_axes(&mut poly);
            *geometry = poly;
        },
        Geometry::Triangle(t) => {
            let mut poly = Geometry::Polygon(t.to_polygon());
            swap_axes(&mut poly);
            *geometry = poly;
        },
    }
}

/// Bounding box of a geometry, `None` when it has no coordinates.
#[must_use]
pub fn envelope(geometry: &Geometry<f64>) -> Option<Extent> {
    let mut extent: Option<Extent> = None;
    visit_coords(geometry, &mut |c| match extent.as_mut() {
        Some(e) => e.include(c),
        None => extent = Some(Extent::new(c.x, c.y, c.x, c.y)),
    });
    extent
}

/// Formats a geometry as WKT.
#[must_use]
pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    geometry.to_wkt().unwrap_or_default()
}

/// Human-readable type name of a geometry.
#[must_use]
pub fn type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}
