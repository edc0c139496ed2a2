//! Types shared by the feature-format decoders (`GeoJSON`, delimited text) and the WFS core.
//!
//! Format crates decode a response body into [`RawCollection`]s: untyped property values in
//! document order plus an optional geometry. The WFS core then coerces them against the layer
//! schema it learned from `DescribeFeatureType`.

use std::fmt;

use geo_types::Geometry;

/// Where in a payload a decoding failure happened. Indices are 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: Option<u64>,
    /// Feature or CSV record.
    pub record: Option<u64>,
    /// CSV column.
    pub field: Option<u64>,
}

impl SourcePosition {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labelled = [("line", self.line), ("record", self.record), ("field", self.field)];
        let mut written = false;
        for (label, value) in labelled {
            let Some(value) = value else { continue };
            if written {
                f.write_str(", ")?;
            }
            write!(f, "{label} {value}")?;
            written = true;
        }
        if !written {
            f.write_str("unknown position")?;
        }
        Ok(())
    }
}

/// Errors raised while decoding a feature payload embedded in a WFS response.
#[derive(Debug)]
pub enum FeatureFormatError {
    /// The payload is not syntactically valid for its format.
    Syntax {
        message: String,
        position: Option<SourcePosition>,
        /// What was being read, e.g. a multipart part name.
        context: Option<String>,
    },
    /// The payload parsed, but its top-level object is not a feature collection.
    NotACollection {
        /// What was found instead.
        found: String,
        context: Option<String>,
    },
    /// A geometry could not be converted.
    Geometry {
        message: String,
        position: Option<SourcePosition>,
    },
    Other { message: String },
}

impl FeatureFormatError {
    fn while_reading(context: Option<&str>) -> String {
        context.map_or_else(String::new, |what| format!(" while reading {what}"))
    }

    fn located(position: Option<&SourcePosition>) -> String {
        match position {
            Some(pos) if !pos.is_empty() => format!(" at {pos}"),
            _ => String::new(),
        }
    }

    /// Appends `context` to what the error says was being read.
    #[must_use]
    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        let context: String = context.into();
        match &mut self {
            FeatureFormatError::Syntax {
                context: existing, ..
            }
            | FeatureFormatError::NotACollection {
                context: existing, ..
            } => {
                *existing = Some(match existing.take().filter(|text| !text.is_empty()) {
                    Some(previous) => format!("{previous}; {context}"),
                    None => context,
                });
            },
            FeatureFormatError::Geometry { message, .. } | FeatureFormatError::Other { message } => {
                *message = format!("{message} ({context})");
            },
        }
        self
    }

    /// Returns true when the payload itself was malformed, as opposed to well-formed but
    /// of an unexpected shape.
    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(self, FeatureFormatError::Syntax { .. })
    }
}

impl fmt::Display for FeatureFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureFormatError::Syntax {
                message,
                position,
                context,
            } => write!(
                f,
                "Syntax error{}{}: {message}",
                Self::while_reading(context.as_deref()),
                Self::located(position.as_ref())
            ),
            FeatureFormatError::NotACollection { found, context } => write!(
                f,
                "Expected a feature collection{}, found {found}",
                Self::while_reading(context.as_deref())
            ),
            FeatureFormatError::Geometry { message, position } => write!(
                f,
                "Invalid geometry{}: {message}",
                Self::located(position.as_ref())
            ),
            FeatureFormatError::Other { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for FeatureFormatError {}

/// Result type alias that uses [`FeatureFormatError`].
pub type FeatureFormatResult<T> = Result<T, FeatureFormatError>;

/// An untyped property value as it appeared in the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    /// Text rendering used when the target field is a string.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            RawValue::Null => None,
            RawValue::Bool(b) => Some(b.to_string()),
            RawValue::Integer(i) => Some(i.to_string()),
            RawValue::Real(r) => Some(r.to_string()),
            RawValue::Text(s) => Some(s.clone()),
        }
    }
}

/// One decoded feature before schema coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeature {
    /// Identifier advertised by the payload (`gml:id`, `GeoJSON` `id`).
    pub id: Option<String>,
    /// Properties in document order.
    pub properties: Vec<(String, RawValue)>,
    /// Geometry in document axis order.
    pub geometry: Option<Geometry<f64>>,
}

impl RawFeature {
    /// Looks a property up by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&RawValue> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// A decoded page of features with whatever counters the payload carried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCollection {
    pub features: Vec<RawFeature>,
    /// Total number of matching features when the server reported it.
    pub number_matched: Option<u64>,
    /// Number of features in this page when the server reported it.
    pub number_returned: Option<u64>,
}

/// Parses a counter attribute that may be the literal `unknown`.
#[must_use]
pub fn parse_count(value: &str) -> Option<u64> {
    match value.trim() {
        count if count.eq_ignore_ascii_case("unknown") => None,
        count => count.parse().ok(),
    }
}
