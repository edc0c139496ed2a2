//! `GeoJSON` decoding for WFS `GetFeature` responses requested with a JSON output format.
//!
//! WFS servers answer with a single `FeatureCollection`. Paging counters travel as foreign
//! members: `numberMatched`/`numberReturned` on WFS 2.0 servers, `totalFeatures` on older
//! `GeoServer` releases. Either may be the string `"unknown"`.
#![allow(clippy::result_large_err)]

pub mod parser;

pub use parser::parse_feature_collection;
