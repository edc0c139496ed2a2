//! Delimited-text decoding for the `.csv` + `.csvt` parts of multipart WFS responses.
//!
//! Some servers answer `OUTPUTFORMAT=multipart` with a zip-less bundle of files. When the
//! bundle holds a CSV file, its companion `.csvt` file lists one type per column and a column
//! named `WKT` (or typed `WKT`) carries the geometry.

pub mod geospatial;

use csv::ReaderBuilder;
use wfs_shared::{
    FeatureFormatError, FeatureFormatResult, RawCollection, RawFeature, RawValue, SourcePosition,
};

use crate::geospatial::parse_wkt;

/// Declared type of a CSV column, as read from a `.csvt` companion file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Real,
    Wkt,
}

impl ColumnType {
    fn from_csvt(token: &str) -> Self {
        // Width/precision suffixes such as `Real(10.2)` are ignored.
        let base = token.trim().trim_matches('"');
        let base = base.split('(').next().unwrap_or(base).trim();
        match base.to_ascii_lowercase().as_str() {
            "integer" | "integer64" => ColumnType::Integer,
            "real" => ColumnType::Real,
            "wkt" => ColumnType::Wkt,
            _ => ColumnType::String,
        }
    }
}

/// Options controlling how a CSV part is read.
#[derive(Debug, Clone)]
pub struct CsvPartOptions {
    /// Field delimiter.
    pub delimiter: u8,
    /// Name of the column holding WKT geometries.
    pub geometry_column: String,
}

impl Default for CsvPartOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            geometry_column: "WKT".to_string(),
        }
    }
}

impl CsvPartOptions {
    /// Set the delimiter character
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Parses the column types of a `.csvt` file.
#[must_use]
pub fn parse_csvt(bytes: &[u8]) -> Vec<ColumnType> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    line.split(',').map(ColumnType::from_csvt).collect()
}

/// Decodes a CSV part, optionally typed by its `.csvt` companion.
///
/// # Errors
///
/// Returns [`FeatureFormatError::Syntax`] when the CSV is malformed and
/// [`FeatureFormatError::Geometry`] when a geometry cell is not valid WKT.
pub fn parse_csv_part(
    csv: &[u8],
    csvt: Option<&[u8]>,
    options: &CsvPartOptions,
    context: &str,
) -> FeatureFormatResult<RawCollection> {
    let types = csvt.map(parse_csvt).unwrap_or_default();

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(options.delimiter)
        .flexible(true)
        .from_reader(csv);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| csv_error(&err, context))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let column_types: Vec<ColumnType> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if name.eq_ignore_ascii_case(&options.geometry_column) {
                ColumnType::Wkt
            } else {
                types.get(idx).copied().unwrap_or(ColumnType::String)
            }
        })
        .collect();

    let mut features = Vec::new();
    for (record_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|err| csv_error(&err, context))?;
        let mut feature = RawFeature::default();

        for (idx, name) in headers.iter().enumerate() {
            let cell = record.get(idx).unwrap_or_default().trim();
            match column_types[idx] {
                ColumnType::Wkt => {
                    if !cell.is_empty() {
                        let geometry = parse_wkt(cell).map_err(|message| FeatureFormatError::Geometry {
                            message,
                            position: Some(SourcePosition {
                                record: Some(record_idx as u64 + 1),
                                field: Some(idx as u64 + 1),
                                ..SourcePosition::default()
                            }),
                        })?;
                        feature.geometry = Some(geometry);
                    }
                },
                column_type => {
                    feature
                        .properties
                        .push((name.clone(), typed_cell(cell, column_type)));
                },
            }
        }
        features.push(feature);
    }

    let count = features.len() as u64;
    Ok(RawCollection {
        features,
        number_matched: None,
        number_returned: Some(count),
    })
}

fn typed_cell(cell: &str, column_type: ColumnType) -> RawValue {
    if cell.is_empty() {
        return RawValue::Null;
    }
    match column_type {
        ColumnType::Integer => cell
            .parse()
            .map_or_else(|_| RawValue::Text(cell.to_string()), RawValue::Integer),
        ColumnType::Real => cell
            .parse()
            .map_or_else(|_| RawValue::Text(cell.to_string()), RawValue::Real),
        ColumnType::String | ColumnType::Wkt => RawValue::Text(cell.to_string()),
    }
}

fn csv_error(err: &csv::Error, context: &str) -> FeatureFormatError {
    let position = err.position().map(|pos| SourcePosition {
        line: Some(pos.line()),
        record: Some(pos.record()),
        ..SourcePosition::default()
    });
    FeatureFormatError::Syntax {
        message: err.to_string(),
        position,
        context: Some(context.to_string()),
    }
}
