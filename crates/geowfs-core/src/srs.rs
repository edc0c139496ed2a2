//! Spatial reference names as they appear in capabilities, GML and filters.
//!
//! No CRS database is involved: the driver only needs to recognise EPSG codes, know whether a
//! name implies latitude/longitude axis order, and project WGS84 extents to Web Mercator.

use std::fmt;

const EARTH_RADIUS: f64 = 6_378_137.0;
/// Latitude limit of the Web Mercator square.
pub const MERCATOR_MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// A spatial reference identified by its advertised name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srs {
    /// Name exactly as advertised.
    pub name: String,
    /// EPSG code when the name carries one.
    pub epsg: Option<u32>,
}

impl Srs {
    /// Recognises `EPSG:n`, `urn:ogc:def:crs:EPSG::n`, `urn:x-ogc:def:crs:EPSG:n`,
    /// `http://www.opengis.net/def/crs/EPSG/0/n` and `http://www.opengis.net/gml/srs/epsg.xml#n`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        let upper = trimmed.to_ascii_uppercase();
        let epsg = if upper.contains("EPSG") {
            trimmed
                .rsplit([':', '/', '#'])
                .next()
                .and_then(|code| code.parse().ok())
        } else if upper == "CRS:84" || upper.ends_with("OGC:1.3:CRS84") || upper.ends_with("OGC::CRS84") {
            Some(4326)
        } else {
            None
        };
        Self {
            name: trimmed.to_string(),
            epsg,
        }
    }

    /// The OGC URN form of an EPSG code.
    #[must_use]
    pub fn from_epsg(code: u32) -> Self {
        Self {
            name: format!("urn:ogc:def:crs:EPSG::{code}"),
            epsg: Some(code),
        }
    }

    /// Whether the code falls in the EPSG range of geographic 2D systems.
    #[must_use]
    pub fn is_geographic(&self) -> bool {
        self.epsg.is_some_and(|code| (4000..5000).contains(&code))
    }

    #[must_use]
    pub fn is_web_mercator(&self) -> bool {
        matches!(self.epsg, Some(3857 | 3785 | 900_913 | 102_100))
    }

    /// Whether coordinates under this name are in latitude/longitude order.
    ///
    /// Only URN and `opengis.net/def` names follow the authority axis order; the short
    /// `EPSG:n` form and `CRS:84` are longitude first.
    #[must_use]
    pub fn has_lat_long_order(&self) -> bool {
        let lower = self.name.to_ascii_lowercase();
        let authority_form =
            lower.starts_with("urn:") || lower.starts_with("http://www.opengis.net/def/crs/");
        authority_form && !lower.contains("crs84") && self.is_geographic()
    }
}

impl fmt::Display for Srs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Projects a WGS84 longitude/latitude to Web Mercator.
#[must_use]
pub fn to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LATITUDE, MERCATOR_MAX_LATITUDE);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(Srs::parse("EPSG:4326").epsg, Some(4326));
        assert_eq!(Srs::parse("urn:ogc:def:crs:EPSG::32630").epsg, Some(32630));
        assert_eq!(Srs::parse("urn:x-ogc:def:crs:EPSG:4258").epsg, Some(4258));
        assert_eq!(Srs::parse("http://www.opengis.net/def/crs/EPSG/0/3857").epsg, Some(3857));
        assert_eq!(Srs::parse("http://www.opengis.net/gml/srs/epsg.xml#27700").epsg, Some(27700));
        assert_eq!(Srs::parse("CRS:84").epsg, Some(4326));
        assert_eq!(Srs::parse("not_a_srs").epsg, None);
    }

    #[test]
    fn axis_order() {
        assert!(Srs::parse("urn:ogc:def:crs:EPSG::4326").has_lat_long_order());
        assert!(!Srs::parse("EPSG:4326").has_lat_long_order());
        assert!(!Srs::parse("urn:ogc:def:crs:EPSG::32630").has_lat_long_order());
        assert!(!Srs::parse("urn:ogc:def:crs:OGC:1.3:CRS84").has_lat_long_order());
        assert!(Srs::from_epsg(4258).has_lat_long_order());
    }

    #[test]
    fn mercator_bounds() {
        let (x, y) = to_web_mercator(180.0, 85.051_128_779_806_5);
        assert!((x - 20_037_508.342_789_248).abs() < 1e-5);
        assert!((y - 20_037_508.342_789).abs() < 1e-2);
        let (x, _) = to_web_mercator(-10.0, 40.0);
        assert!((x + 1_113_194.907_932_735_7).abs() < 1e-3);
    }
}
