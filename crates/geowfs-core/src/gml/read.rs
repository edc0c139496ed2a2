//! GML to `geo-types` conversion.
//!
//! Coordinates are returned in document order. Whether they need swapping depends on the SRS
//! and is decided by the caller.

use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon, Rect,
};
use thiserror::Error;

use crate::xml::XmlElement;

/// Errors raised while reading a GML geometry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GmlError {
    #[error("Unsupported GML geometry <{0}>")]
    Unsupported(String),

    #[error("Invalid coordinates in <{element}>: '{text}'")]
    InvalidCoordinates { element: String, text: String },

    #[error("<{0}> has no coordinates")]
    Empty(String),
}

const GEOMETRY_ELEMENTS: &[&str] = &[
    "Point",
    "LineString",
    "LinearRing",
    "Curve",
    "CompositeCurve",
    "Polygon",
    "Surface",
    "PolyhedralSurface",
    "Envelope",
    "Box",
    "MultiPoint",
    "MultiLineString",
    "MultiCurve",
    "MultiPolygon",
    "MultiSurface",
    "MultiGeometry",
];

/// Whether a local element name denotes a GML geometry.
#[must_use]
pub fn is_geometry_element(local: &str) -> bool {
    GEOMETRY_ELEMENTS.contains(&local)
}

/// First geometry element directly below a property element.
#[must_use]
pub fn find_geometry(property: &XmlElement) -> Option<&XmlElement> {
    property
        .elements()
        .find(|child| is_geometry_element(child.local_name()))
}

/// `srsName` of a geometry, looked up on the element itself and then on its first members.
#[must_use]
pub fn geometry_srs_name(element: &XmlElement) -> Option<&str> {
    element.attr("srsName").or_else(|| {
        element
            .elements()
            .flat_map(XmlElement::elements)
            .find_map(|member| member.attr("srsName"))
    })
}

/// Converts a GML geometry element.
///
/// # Errors
///
/// Returns a [`GmlError`] for unknown geometry elements and unreadable coordinates.
pub fn parse_geometry(element: &XmlElement) -> Result<Geometry<f64>, GmlError> {
    let local = element.local_name();
    match local {
        "Point" => {
            let coords = coordinates(element)?;
            coords
                .first()
                .map(|c| Geometry::Point(Point(*c)))
                .ok_or_else(|| GmlError::Empty(local.to_string()))
        },
        "LineString" | "LinearRing" | "Curve" | "CompositeCurve" => {
            Ok(Geometry::LineString(line_string(element)?))
        },
        "Polygon" => Ok(Geometry::Polygon(polygon(element)?)),
        "Surface" | "PolyhedralSurface" => {
            let mut polygons = surface_patches(element)?;
            if polygons.len() == 1 {
                Ok(Geometry::Polygon(polygons.remove(0)))
            } else {
                Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
            }
        },
        "Envelope" => {
            let lower = element
                .child("lowerCorner")
                .map(|c| parse_pos(local, &c.text()))
                .transpose()?;
            let upper = element
                .child("upperCorner")
                .map(|c| parse_pos(local, &c.text()))
                .transpose()?;
            match (lower, upper) {
                (Some(lower), Some(upper)) => Ok(rect(lower, upper)),
                _ => Err(GmlError::Empty(local.to_string())),
            }
        },
        "Box" => {
            let coords = coordinates(element)?;
            match coords.as_slice() {
                [lower, upper, ..] => Ok(rect(*lower, *upper)),
                _ => Err(GmlError::Empty(local.to_string())),
            }
        },
        "MultiPoint" => {
            let points = members(element)?
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::Point(p) => Some(p),
                    _ => None,
                })
                .collect();
            Ok(Geometry::MultiPoint(MultiPoint(points)))
        },
        "MultiLineString" | "MultiCurve" => {
            let lines = members(element)?
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::LineString(ls) => vec![ls],
                    Geometry::MultiLineString(mls) => mls.0,
                    _ => Vec::new(),
                })
                .collect();
            Ok(Geometry::MultiLineString(MultiLineString(lines)))
        },
        "MultiPolygon" | "MultiSurface" => {
            let polygons = members(element)?
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::Polygon(p) => vec![p],
                    Geometry::MultiPolygon(mp) => mp.0,
                    _ => Vec::new(),
                })
                .collect();
            Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
        },
        "MultiGeometry" => Ok(Geometry::GeometryCollection(GeometryCollection(members(
            element,
        )?))),
        other => Err(GmlError::Unsupported(other.to_string())),
    }
}

fn rect(lower: Coord<f64>, upper: Coord<f64>) -> Geometry<f64> {
    Geometry::Polygon(Rect::new(lower, upper).to_polygon())
}

/// Geometries of `*Member` and `*Members` children.
fn members(element: &XmlElement) -> Result<Vec<Geometry<f64>>, GmlError> {
    let mut geometries = Vec::new();
    for wrapper in element.elements() {
        let local = wrapper.local_name();
        if !(local.ends_with("Member") || local.ends_with("Members")) {
            continue;
        }
        for child in wrapper.elements() {
            if is_geometry_element(child.local_name()) {
                geometries.push(parse_geometry(child)?);
            }
        }
    }
    Ok(geometries)
}

fn line_string(element: &XmlElement) -> Result<LineString<f64>, GmlError> {
    match element.local_name() {
        "Curve" => {
            let mut coords = Vec::new();
            if let Some(segments) = element.child("segments") {
                for segment in segments.elements() {
                    coords.extend(coordinates(segment)?);
                }
            }
            Ok(LineString(coords))
        },
        "CompositeCurve" | "Ring" => {
            let mut coords = Vec::new();
            for geometry in members(element)? {
                if let Geometry::LineString(ls) = geometry {
                    coords.extend(ls.0);
                }
            }
            Ok(LineString(coords))
        },
        _ => Ok(LineString(coordinates(element)?)),
    }
}

fn ring(boundary: &XmlElement) -> Result<Option<LineString<f64>>, GmlError> {
    boundary
        .elements()
        .find(|e| matches!(e.local_name(), "LinearRing" | "Ring"))
        .map(line_string)
        .transpose()
}

fn polygon(element: &XmlElement) -> Result<Polygon<f64>, GmlError> {
    let mut exterior = None;
    let mut interiors = Vec::new();
    for boundary in element.elements() {
        match boundary.local_name() {
            "exterior" | "outerBoundaryIs" => exterior = ring(boundary)?,
            "interior" | "innerBoundaryIs" => interiors.extend(ring(boundary)?),
            _ => {},
        }
    }
    let exterior = exterior.ok_or_else(|| GmlError::Empty(element.local_name().to_string()))?;
    Ok(Polygon::new(exterior, interiors))
}

fn surface_patches(element: &XmlElement) -> Result<Vec<Polygon<f64>>, GmlError> {
    let patches = element
        .child("patches")
        .or_else(|| element.child("polygonPatches"))
        .ok_or_else(|| GmlError::Empty(element.local_name().to_string()))?;
    patches.elements().map(polygon).collect()
}

fn dimension(element: &XmlElement, fallback: Option<&XmlElement>) -> usize {
    element
        .attr("srsDimension")
        .or_else(|| fallback.and_then(|f| f.attr("srsDimension")))
        .and_then(|d| d.parse().ok())
        .filter(|d: &usize| *d >= 2)
        .unwrap_or(2)
}

fn parse_numbers(element: &str, text: &str) -> Result<Vec<f64>, GmlError> {
    text.split_whitespace()
        .map(|token| {
            token.parse().map_err(|_| GmlError::InvalidCoordinates {
                element: element.to_string(),
                text: text.trim().to_string(),
            })
        })
        .collect()
}

fn parse_pos(element: &str, text: &str) -> Result<Coord<f64>, GmlError> {
    match parse_numbers(element, text)?.as_slice() {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(GmlError::InvalidCoordinates {
            element: element.to_string(),
            text: text.trim().to_string(),
        }),
    }
}

/// GML 2 `<coordinates>` with its `cs`/`ts` separators.
fn parse_coordinates_text(element: &XmlElement) -> Result<Vec<Coord<f64>>, GmlError> {
    let cs = element.attr("cs").unwrap_or(",");
    let ts = element.attr("ts").unwrap_or(" ");
    let text = element.text();
    let invalid = || GmlError::InvalidCoordinates {
        element: "coordinates".to_string(),
        text: text.trim().to_string(),
    };
    let tuples: Vec<&str> = if ts.trim().is_empty() {
        text.split_whitespace().collect()
    } else {
        text.split(ts).map(str::trim).filter(|t| !t.is_empty()).collect()
    };
    tuples
        .into_iter()
        .map(|tuple| {
            let mut parts = tuple.split(cs).map(|p| p.trim().parse::<f64>());
            match (parts.next(), parts.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Ok(Coord { x, y }),
                _ => Err(invalid()),
            }
        })
        .collect()
}

/// Coordinates held by `posList`, `coordinates`, `pos` or `coord` children.
fn coordinates(element: &XmlElement) -> Result<Vec<Coord<f64>>, GmlError> {
    if let Some(pos_list) = element.child("posList") {
        let dim = dimension(pos_list, Some(element));
        let numbers = parse_numbers("posList", &pos_list.text())?;
        if numbers.len() % dim != 0 {
            return Err(GmlError::InvalidCoordinates {
                element: "posList".to_string(),
                text: pos_list.text().trim().to_string(),
            });
        }
        return Ok(numbers
            .chunks(dim)
            .map(|chunk| Coord {
                x: chunk[0],
                y: chunk[1],
            })
            .collect());
    }
    if let Some(coords) = element.child("coordinates") {
        return parse_coordinates_text(coords);
    }
    let mut coords = Vec::new();
    for child in element.elements() {
        match child.local_name() {
            "pos" => coords.push(parse_pos("pos", &child.text())?),
            "coord" => {
                let value = |axis: &str| {
                    child
                        .child_text(axis)
                        .and_then(|t| t.parse::<f64>().ok())
                        .ok_or_else(|| GmlError::InvalidCoordinates {
                            element: "coord".to_string(),
                            text: axis.to_string(),
                        })
                };
                coords.push(Coord {
                    x: value("X")?,
                    y: value("Y")?,
                });
            },
            "pointProperty" | "pointRep" => {
                if let Some(Geometry::Point(p)) =
                    find_geometry(child).map(parse_geometry).transpose()?
                {
                    coords.push(p.0);
                }
            },
            _ => {},
        }
    }
    Ok(coords)
}
