//! Typed features handed to callers.

use std::fmt;

use geo_types::Geometry;
use wfs_shared::RawValue;

use crate::decoder::DecodedFeature;
use crate::schema::{FieldType, GML_ID, LayerSchema};

/// A field value coerced to its schema type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Text used when the value is written into XML or compared as a string.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Coerces a decoded value to `field_type`. Values that do not fit become null.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_raw(raw: &RawValue, field_type: FieldType) -> Self {
        match (raw, field_type) {
            (RawValue::Null, _) => Self::Null,
            (
                _,
                FieldType::String | FieldType::Date | FieldType::Time | FieldType::DateTime,
            ) => raw.to_text().map_or(Self::Null, Self::String),
            (RawValue::Bool(b), FieldType::Boolean) => Self::Boolean(*b),
            (RawValue::Integer(i), FieldType::Boolean) => Self::Boolean(*i != 0),
            (RawValue::Text(t), FieldType::Boolean) => match t.trim() {
                "true" | "1" => Self::Boolean(true),
                "false" | "0" => Self::Boolean(false),
                _ => Self::Null,
            },
            (RawValue::Integer(i), t) if t.is_integer() => Self::Integer(*i),
            (RawValue::Real(r), t) if t.is_integer() => Self::Integer(*r as i64),
            (RawValue::Bool(b), t) if t.is_integer() => Self::Integer(i64::from(*b)),
            (RawValue::Text(text), t) if t.is_integer() => {
                let text = text.trim();
                text.parse()
                    .map(Self::Integer)
                    .or_else(|_| text.parse::<f64>().map(|r| Self::Integer(r as i64)))
                    .unwrap_or(Self::Null)
            },
            #[allow(clippy::cast_precision_loss)]
            (RawValue::Integer(i), _) => Self::Real(*i as f64),
            (RawValue::Real(r), _) => Self::Real(*r),
            (RawValue::Bool(b), _) => Self::Real(f64::from(u8::from(*b))),
            (RawValue::Text(text), _) => text.trim().parse().map_or(Self::Null, Self::Real),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// A feature: optional client-side id, named fields and named geometries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    pub fid: Option<i64>,
    pub fields: Vec<(String, FieldValue)>,
    pub geometries: Vec<(String, Geometry<f64>)>,
}

/// Numeric suffix of a server identifier (`my_layer.100` gives 100).
#[must_use]
pub fn fid_from_id(id: &str) -> Option<i64> {
    id.rsplit_once('.').map_or(id, |(_, suffix)| suffix).parse().ok()
}

impl Feature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Adds a geometry under `name`. An empty name stands for the layer's geometry field.
    #[must_use]
    pub fn with_geometry(mut self, name: impl Into<String>, geometry: Geometry<f64>) -> Self {
        self.geometries.push((name.into(), geometry));
        self
    }

    /// Looks a field up by exact name, then case-insensitively.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| self.fields.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)))
            .map(|(_, value)| value)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// The `gml_id` value, when set.
    #[must_use]
    pub fn gml_id(&self) -> Option<&str> {
        self.field(GML_ID).and_then(FieldValue::as_str)
    }

    /// First geometry of the feature.
    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometries.first().map(|(_, geometry)| geometry)
    }

    #[must_use]
    pub fn geometry_named(&self, name: &str) -> Option<&Geometry<f64>> {
        self.geometries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, geometry)| geometry)
    }

    /// Builds a feature laid out after `schema`.
    ///
    /// Fields missing from the payload are null. The geometry is the payload geometry named
    /// like the schema geometry field, or the first one.
    #[must_use]
    pub fn from_decoded(decoded: &DecodedFeature, schema: &LayerSchema) -> Self {
        let fields = schema
            .fields
            .iter()
            .map(|field| {
                let value = if field.name == GML_ID && schema.exposes_gml_id() {
                    decoded
                        .id
                        .clone()
                        .map_or(FieldValue::Null, FieldValue::String)
                } else {
                    decoded
                        .property(&field.name)
                        .map_or(FieldValue::Null, |raw| FieldValue::from_raw(raw, field.field_type))
                };
                (field.name.clone(), value)
            })
            .collect();

        let geometries = schema
            .geometry
            .as_ref()
            .and_then(|descriptor| {
                decoded
                    .geometry_named(&descriptor.name)
                    .or_else(|| decoded.geometries.first().map(|(_, g)| g))
                    .map(|geometry| vec![(descriptor.name.clone(), geometry.clone())])
            })
            .unwrap_or_default();

        Self {
            fid: decoded.id.as_deref().and_then(fid_from_id),
            fields,
            geometries,
        }
    }
}
