//! WKT geometry cells.

use geo_types::Geometry;
use geozero::ToGeo;
use geozero::wkt::Wkt;

/// Parse a WKT string into a geometry.
///
/// # Errors
///
/// Returns a description of the failure when the text is not valid WKT.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>, String> {
    Wkt(text)
        .to_geo()
        .map_err(|err| format!("Failed to parse WKT '{text}': {err}"))
}
