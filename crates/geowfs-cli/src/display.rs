//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions
//! for presenting endpoints, layers, schemas and features in a human-readable format.

use geowfs_core::{Feature, LayerSchema, WfsDataSource};
use geowfs_core_common::supported_versions;
use geozero::ToWkt;
use tabled::{Table, Tabled};

/// Longest WKT shown in a feature table cell.
const MAX_WKT_CHARS: usize = 60;

/// Table row representation for displaying layer information.
#[derive(Tabled)]
pub struct LayerRow {
    #[tabled(rename = "Layer")]
    pub name: String,
    #[tabled(rename = "Title")]
    pub title: String,
    /// Default SRS followed by the number of alternatives.
    #[tabled(rename = "SRS")]
    pub srs: String,
}

/// Table row representation for displaying field/column information.
#[derive(Tabled)]
pub struct FieldRow {
    #[tabled(rename = "Field")]
    pub name: String,
    #[tabled(rename = "Type")]
    pub data_type: String,
    #[tabled(rename = "Nullable")]
    pub nullable: String,
}

/// Table row representation for displaying a feature.
#[derive(Tabled)]
pub struct FeatureRow {
    #[tabled(rename = "FID")]
    pub fid: String,
    #[tabled(rename = "Attributes")]
    pub attributes: String,
    #[tabled(rename = "Geometry")]
    pub geometry: String,
}

/// Table row representation for displaying protocol version support.
#[derive(Tabled)]
pub struct VersionRow {
    #[tabled(rename = "Version")]
    pub version: String,
    #[tabled(rename = "Filter")]
    pub filter: String,
    #[tabled(rename = "Read")]
    pub read: String,
    #[tabled(rename = "Transactions")]
    pub transactions: String,
    #[tabled(rename = "Paging")]
    pub paging: String,
    #[tabled(rename = "Hits")]
    pub hits: String,
    #[tabled(rename = "Joins")]
    pub joins: String,
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

/// Display endpoint information.
pub fn display_endpoint_info(ds: &WfsDataSource) {
    let capabilities = ds.capabilities();
    println!("\nEndpoint: {}", ds.base_url());
    println!("Version: {}", capabilities.version);
    if let Some(title) = &capabilities.title {
        println!("Title: {title}");
    }
    if let Some(path) = ds.description_path() {
        println!("Description file: {}", path.display());
    }
    println!("Layers: {}", ds.layer_count());
    println!("Paging: {}", yes_no(capabilities.paging_supported));
    if let Some(page_size) = capabilities.default_page_size {
        println!("Default page size: {page_size}");
    }
    println!("Hits: {}", yes_no(capabilities.hits_supported));
    println!("Joins: {}", yes_no(capabilities.joins_supported));
    println!("Transactions: {}", yes_no(capabilities.transactions_supported()));
    if !capabilities.output_formats.is_empty() {
        println!("Output formats: {}", capabilities.output_formats.join(", "));
    }
}

/// Display the layers of an endpoint in a formatted table.
pub fn display_layers(ds: &WfsDataSource) {
    let rows: Vec<LayerRow> = ds
        .layers()
        .map(|layer| {
            let capability = layer.capability();
            let srs = match (&capability.default_srs, capability.other_srs.len()) {
                (Some(srs), 0) => srs.clone(),
                (Some(srs), others) => format!("{srs} (+{others})"),
                (None, _) => "N/A".to_string(),
            };
            LayerRow {
                name: capability.name.clone(),
                title: capability.title.clone().unwrap_or_default(),
                srs,
            }
        })
        .collect();

    println!("\nLayers ({} total):\n", rows.len());
    println!("{}", Table::new(rows));
}

/// Display a layer schema: fields first, then the geometry column.
pub fn display_schema(name: &str, schema: &LayerSchema) {
    println!("\nLayer: {name}");
    if schema.inferred {
        println!("(schema inferred from a sample feature)");
    }

    match &schema.geometry {
        Some(geometry) => println!("Geometry: {} ({})", geometry.name, geometry.geometry_type),
        None => println!("Geometry: none"),
    }

    if !schema.fields.is_empty() {
        println!("\n=== Fields ===");
        let rows: Vec<FieldRow> = schema
            .fields
            .iter()
            .map(|f| FieldRow {
                name: f.name.clone(),
                data_type: f.field_type.to_string(),
                nullable: yes_no(f.nillable).to_string(),
            })
            .collect();
        println!("{}", Table::new(rows));
    }
}

fn truncated(mut text: String) -> String {
    if let Some((idx, _)) = text.char_indices().nth(MAX_WKT_CHARS) {
        text.truncate(idx);
        text.push_str("...");
    }
    text
}

/// Builds the table row of one feature.
#[must_use]
pub fn feature_row(feature: &Feature) -> FeatureRow {
    let attributes = feature
        .fields
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ");
    let geometry = feature
        .geometry()
        .and_then(|geometry| geometry.to_wkt().ok())
        .map_or_else(String::new, truncated);
    FeatureRow {
        fid: feature.fid.map_or_else(String::new, |fid| fid.to_string()),
        attributes,
        geometry,
    }
}

/// Display features in a formatted table.
pub fn display_features(features: &[Feature]) {
    let rows: Vec<FeatureRow> = features.iter().map(feature_row).collect();
    println!("\nFeatures ({} shown):\n", rows.len());
    println!("{}", Table::new(rows));
}

/// Display the protocol version support matrix.
pub fn display_versions() {
    let rows: Vec<VersionRow> = supported_versions()
        .iter()
        .map(|v| VersionRow {
            version: v.version.to_string(),
            filter: v.filter_encoding.to_string(),
            read: v.capabilities.read.as_str().to_string(),
            transactions: v.capabilities.transactions.as_str().to_string(),
            paging: v.capabilities.paging.as_str().to_string(),
            hits: v.capabilities.hits.as_str().to_string(),
            joins: v.capabilities.joins.as_str().to_string(),
        })
        .collect();

    println!("\nSupported WFS versions ({} total):\n", rows.len());
    println!("{}", Table::new(rows));
}
