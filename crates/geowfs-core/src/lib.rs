//! `geowfs-core` is a client driver for OGC Web Feature Services 1.0.0, 1.1.0 and 2.0.x,
//! exposing remote feature types as readable (and, with WFS-T, writable) layers.
//!
//! This crate includes:
//! - **Capabilities**: parsing of `GetCapabilities` documents into layers, operations and
//!   server features (paging, joins, hit counts, filter operators).
//! - **Schemas**: `DescribeFeatureType` XSD parsing, with a shared cache and sample-based
//!   inference when the server cannot describe a layer.
//! - **Filters**: SQL predicates translated into OGC Filter / FES documents, or evaluated
//!   client-side when the server cannot.
//! - **Responses**: streaming and buffered decoding of GML, GeoJSON and multipart results.
//! - **Paging, transactions and joins**: `STARTINDEX`/`COUNT` cursors, WFS-T Insert/Update/Delete
//!   and `TYPENAMES=(A,B)` join queries.
//!
//! [`WfsDataSource`] is the entry point. Requests go through a
//! [`geowfs_core_common::Fetcher`], so the crate never opens connections itself.

pub mod capabilities;
pub mod config;
mod context;
pub mod datasource;
pub mod decoder;
pub mod description;
pub mod error;
pub mod feature;
pub mod filter;
pub mod geometry;
pub mod gml;
pub mod join;
pub mod layer;
pub mod paging;
pub mod request;
pub mod schema;
pub mod srs;
pub mod transaction;
pub mod url;
pub mod xml;

pub use capabilities::{Capabilities, LayerCapability, WfsVersion};
pub use config::{OpenOptions, WfsConfig};
pub use datasource::WfsDataSource;
pub use error::{Result, WfsError};
pub use feature::{Feature, FieldValue};
pub use geometry::Extent;
pub use join::JoinLayer;
pub use layer::{FeatureSource, MemoryLayer, WfsLayer};
pub use schema::{FieldType, GeometryType, LayerSchema};
pub use transaction::TransactionState;
