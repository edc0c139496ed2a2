//! GML geometry reading and writing.
//!
//! Only the geometry vocabulary WFS servers actually emit is covered: GML 2 `coordinates`,
//! GML 3 `pos`/`posList`, simple curves and surfaces, envelopes and the multi-geometries.

pub mod read;
pub mod write;

pub use read::{GmlError, find_geometry, geometry_srs_name, is_geometry_element, parse_geometry};
pub use write::{GmlProfile, GmlWriter, write_box, write_envelope};
