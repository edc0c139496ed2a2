//! `geo-types` to GML serialization for filters and transactions.

use std::fmt::Write as _;

use geo_types::{Coord, Geometry, LineString, Polygon};

use crate::geometry::Extent;
use crate::xml::escape_attr;

/// Geometry encoding flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GmlProfile {
    /// `gml:coordinates`, `outerBoundaryIs`, `*Member` multi-geometries.
    Gml2,
    /// `gml:pos`/`gml:posList`, `exterior`, `MultiCurve`/`MultiSurface`.
    Gml3,
}

/// Serializes geometries as compact GML fragments.
///
/// `srsName` goes on the outermost element only. When ids are enabled, each written geometry
/// receives `gml:id="idN"` with `N` counting from 1 across calls on the same writer.
#[derive(Debug, Clone)]
pub struct GmlWriter {
    profile: GmlProfile,
    srs_name: Option<String>,
    swap_axes: bool,
    next_id: Option<usize>,
}

impl GmlWriter {
    #[must_use]
    pub fn new(profile: GmlProfile) -> Self {
        Self {
            profile,
            srs_name: None,
            swap_axes: false,
            next_id: None,
        }
    }

    #[must_use]
    pub fn with_srs_name(mut self, srs_name: Option<impl Into<String>>) -> Self {
        self.srs_name = srs_name.map(Into::into);
        self
    }

    /// Writes coordinates as `y x`.
    #[must_use]
    pub fn with_swapped_axes(mut self, swap: bool) -> Self {
        self.swap_axes = swap;
        self
    }

    #[must_use]
    pub fn with_ids(mut self) -> Self {
        self.next_id = Some(1);
        self
    }

    /// Changes `srsName` and axis order for later writes. The id counter is kept.
    pub fn set_reference(&mut self, srs_name: Option<String>, swap_axes: bool) {
        self.srs_name = srs_name;
        self.swap_axes = swap_axes;
    }

    #[must_use]
    pub fn profile(&self) -> GmlProfile {
        self.profile
    }

    pub fn write(&mut self, geometry: &Geometry<f64>) -> String {
        let mut attrs = String::new();
        if let Some(srs) = &self.srs_name {
            let _ = write!(attrs, " srsName=\"{}\"", escape_attr(srs));
        }
        if let Some(id) = self.next_id.as_mut() {
            let _ = write!(attrs, " gml:id=\"id{id}\"");
            *id += 1;
        }
        let mut out = String::new();
        self.write_geometry(geometry, &attrs, &mut out);
        out
    }

    fn coord(&self, c: Coord<f64>) -> (f64, f64) {
        if self.swap_axes { (c.y, c.x) } else { (c.x, c.y) }
    }

    fn pos_list(&self, coords: &[Coord<f64>]) -> String {
        match self.profile {
            GmlProfile::Gml3 => coords
                .iter()
                .map(|c| {
                    let (a, b) = self.coord(*c);
                    format!("{a} {b}")
                })
                .collect::<Vec<_>>()
                .join(" "),
            GmlProfile::Gml2 => coords
                .iter()
                .map(|c| {
                    let (a, b) = self.coord(*c);
                    format!("{a},{b}")
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    fn coordinates_element(&self, coords: &[Coord<f64>], single: bool) -> String {
        let text = self.pos_list(coords);
        match (self.profile, single) {
            (GmlProfile::Gml2, _) => format!("<gml:coordinates>{text}</gml:coordinates>"),
            (GmlProfile::Gml3, true) => format!("<gml:pos>{text}</gml:pos>"),
            (GmlProfile::Gml3, false) => format!("<gml:posList>{text}</gml:posList>"),
        }
    }

    fn write_ring(&self, ring: &LineString<f64>, out: &mut String) {
        out.push_str("<gml:LinearRing>");
        out.push_str(&self.coordinates_element(&ring.0, false));
        out.push_str("</gml:LinearRing>");
    }

    fn write_polygon(&self, polygon: &Polygon<f64>, attrs: &str, out: &mut String) {
        let (outer, inner) = match self.profile {
            GmlProfile::Gml2 => ("outerBoundaryIs", "innerBoundaryIs"),
            GmlProfile::Gml3 => ("exterior", "interior"),
        };
        let _ = write!(out, "<gml:Polygon{attrs}><gml:{outer}>");
        self.write_ring(polygon.exterior(), out);
        let _ = write!(out, "</gml:{outer}>");
        for ring in polygon.interiors() {
            let _ = write!(out, "<gml:{inner}>");
            self.write_ring(ring, out);
            let _ = write!(out, "</gml:{inner}>");
        }
        out.push_str("</gml:Polygon>");
    }

    fn write_multi<I>(&self, container: &str, member: &str, parts: I, attrs: &str, out: &mut String)
    where
        I: IntoIterator<Item = Geometry<f64>>,
    {
        let _ = write!(out, "<gml:{container}{attrs}>");
        for part in parts {
            let _ = write!(out, "<gml:{member}>");
            self.write_geometry(&part, "", out);
            let _ = write!(out, "</gml:{member}>");
        }
        let _ = write!(out, "</gml:{container}>");
    }

    fn write_geometry(&self, geometry: &Geometry<f64>, attrs: &str, out: &mut String) {
        let gml3 = self.profile == GmlProfile::Gml3;
        match geometry {
            Geometry::Point(p) => {
                let _ = write!(
                    out,
                    "<gml:Point{attrs}>{}</gml:Point>",
                    self.coordinates_element(&[p.0], true)
                );
            },
            Geometry::Line(line) => {
                let ls = LineString(vec![line.start, line.end]);
                self.write_geometry(&Geometry::LineString(ls), attrs, out);
            },
            Geometry::LineString(ls) => {
                let _ = write!(
                    out,
                    "<gml:LineString{attrs}>{}</gml:LineString>",
                    self.coordinates_element(&ls.0, false)
                );
            },
            Geometry::Polygon(polygon) => self.write_polygon(polygon, attrs, out),
            Geometry::Rect(rect) => self.write_polygon(&rect.to_polygon(), attrs, out),
            Geometry::Triangle(triangle) => {
                self.write_polygon(&triangle.to_polygon(), attrs, out);
            },
            Geometry::MultiPoint(mp) => self.write_multi(
                "MultiPoint",
                "pointMember",
                mp.0.iter().copied().map(Geometry::Point),
                attrs,
                out,
            ),
            Geometry::MultiLineString(mls) => {
                let (container, member) = if gml3 {
                    ("MultiCurve", "curveMember")
                } else {
                    ("MultiLineString", "lineStringMember")
                };
                self.write_multi(
                    container,
                    member,
                    mls.0.iter().cloned().map(Geometry::LineString),
                    attrs,
                    out,
                );
            },
            Geometry::MultiPolygon(mpoly) => {
                let (container, member) = if gml3 {
                    ("MultiSurface", "surfaceMember")
                } else {
                    ("MultiPolygon", "polygonMember")
                };
                self.write_multi(
                    container,
                    member,
                    mpoly.0.iter().cloned().map(Geometry::Polygon),
                    attrs,
                    out,
                );
            },
            Geometry::GeometryCollection(gc) => self.write_multi(
                "MultiGeometry",
                "geometryMember",
                gc.0.iter().cloned(),
                attrs,
                out,
            ),
        }
    }
}

/// GML 3 `gml:Envelope` with `lowerCorner`/`upperCorner`.
#[must_use]
pub fn write_envelope(extent: &Extent, srs_name: Option<&str>, swap_axes: bool) -> String {
    let (lower, upper) = if swap_axes {
        ((extent.min_y, extent.min_x), (extent.max_y, extent.max_x))
    } else {
        ((extent.min_x, extent.min_y), (extent.max_x, extent.max_y))
    };
    let srs = srs_name
        .map(|s| format!(" srsName=\"{}\"", escape_attr(s)))
        .unwrap_or_default();
    format!(
        "<gml:Envelope{srs}><gml:lowerCorner>{} {}</gml:lowerCorner><gml:upperCorner>{} {}</gml:upperCorner></gml:Envelope>",
        lower.0, lower.1, upper.0, upper.1
    )
}

/// GML 2 `gml:Box`, written with 16 decimals as legacy servers expect.
#[must_use]
pub fn write_box(extent: &Extent, swap_axes: bool) -> String {
    let (lower, upper) = if swap_axes {
        ((extent.min_y, extent.min_x), (extent.max_y, extent.max_x))
    } else {
        ((extent.min_x, extent.min_y), (extent.max_x, extent.max_y))
    };
    format!(
        "<gml:Box><gml:coordinates>{:.16},{:.16} {:.16},{:.16}</gml:coordinates></gml:Box>",
        lower.0, lower.1, upper.0, upper.1
    )
}
