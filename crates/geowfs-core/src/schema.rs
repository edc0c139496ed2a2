//! Layer schemas from `DescribeFeatureType` responses.
//!
//! A [`LayerSchema`] is read from the XML Schema document a server returns, or inferred from a
//! sample feature when no usable schema is available. The [`SchemaCache`] keeps the schemas a
//! datasource has already resolved together with the document each came from.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use wfs_shared::RawValue;

use crate::config::SchemaOptions;
use crate::error::ResponseError;
use crate::xml::{XmlElement, local_name, parse_document};

/// Name of the identity field.
pub const GML_ID: &str = "gml_id";

/// Attribute field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Boolean,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Date,
    Time,
    DateTime,
}

impl FieldType {
    /// Maps an XML Schema built-in type to a field type.
    #[must_use]
    pub fn from_xsd(type_name: &str) -> Option<Self> {
        let field_type = match local_name(type_name) {
            "string" | "anyURI" | "token" | "normalizedString" | "NCName" | "ID" | "language"
            | "duration" => Self::String,
            "boolean" => Self::Boolean,
            "short" | "byte" | "unsignedByte" => Self::Int16,
            "int" | "unsignedShort" => Self::Int32,
            "long" | "integer" | "unsignedInt" | "unsignedLong" | "nonNegativeInteger"
            | "positiveInteger" | "negativeInteger" | "nonPositiveInteger" => Self::Int64,
            "float" => Self::Float32,
            "double" | "decimal" => Self::Float64,
            "date" => Self::Date,
            "time" => Self::Time,
            "dateTime" => Self::DateTime,
            _ => return None,
        };
        Some(field_type)
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int16 | Self::Int32 | Self::Int64 | Self::Float32 | Self::Float64
        )
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// XML Schema type used when a schema is written back.
    #[must_use]
    pub fn xsd_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "dateTime",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::DateTime => "DateTime",
        };
        f.write_str(name)
    }
}

/// Geometry types named by `gml:*PropertyType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryType {
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    /// Maps a GML property type (`gml:PointPropertyType`, ...) to a geometry type.
    #[must_use]
    pub fn from_gml_property_type(type_name: &str) -> Option<Self> {
        let geometry_type = match local_name(type_name) {
            "PointPropertyType" => Self::Point,
            "LineStringPropertyType" | "CurvePropertyType" => Self::LineString,
            "PolygonPropertyType" | "SurfacePropertyType" => Self::Polygon,
            "MultiPointPropertyType" => Self::MultiPoint,
            "MultiLineStringPropertyType" | "MultiCurvePropertyType" => Self::MultiLineString,
            "MultiPolygonPropertyType" | "MultiSurfacePropertyType" => Self::MultiPolygon,
            "MultiGeometryPropertyType" => Self::GeometryCollection,
            "GeometryPropertyType" | "GeometryAssociationType" => Self::Unknown,
            _ => return None,
        };
        Some(geometry_type)
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Geometry",
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub nillable: bool,
}

impl FieldDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nillable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryFieldDescriptor {
    pub name: String,
    pub geometry_type: GeometryType,
}

/// Fields and geometry of one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSchema {
    /// Exposed fields, `gml_id` first when exposed.
    pub fields: Vec<FieldDescriptor>,
    pub geometry: Option<GeometryFieldDescriptor>,
    /// Whether the schema declares at least one attribute field.
    pub has_primary_key: bool,
    /// `targetNamespace` of the schema document.
    pub target_namespace: Option<String>,
    /// Built from a sample feature rather than a schema document.
    pub inferred: bool,
}

impl LayerSchema {
    /// Assembles a schema from declared fields, adding the identity field when exposed.
    #[must_use]
    pub fn new(
        declared: Vec<FieldDescriptor>,
        geometry: Option<GeometryFieldDescriptor>,
        options: SchemaOptions,
    ) -> Self {
        let has_primary_key = !declared.is_empty();
        let mut fields = Vec::with_capacity(declared.len() + 1);
        if options.expose_gml_id {
            fields.push(FieldDescriptor {
                name: GML_ID.to_string(),
                field_type: FieldType::String,
                nillable: false,
            });
        }
        fields.extend(declared);
        Self {
            fields,
            geometry,
            has_primary_key,
            target_namespace: None,
            inferred: false,
        }
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn geometry_field_count(&self) -> usize {
        usize::from(self.geometry.is_some())
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn exposes_gml_id(&self) -> bool {
        self.fields.first().is_some_and(|field| field.name == GML_ID)
    }

    /// Fields declared by the server, without the identity field.
    pub fn declared_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| field.name != GML_ID)
    }

    #[must_use]
    pub fn geometry_name(&self) -> Option<&str> {
        self.geometry.as_ref().map(|g| g.name.as_str())
    }
}

/// Parses a `DescribeFeatureType` body into its schema root.
///
/// # Errors
///
/// Returns the usual response errors, and [`ResponseError::MissingSchemaRoot`] when the root
/// element is not an XML Schema.
pub fn parse_schema_document(body: &[u8]) -> Result<XmlElement, ResponseError> {
    let root = parse_document(body)?;
    match root.local_name() {
        "schema" => Ok(root),
        "ServiceExceptionReport" | "ExceptionReport" => Err(ResponseError::ServerException {
            content: String::from_utf8_lossy(body).into_owned(),
        }),
        _ => Err(ResponseError::MissingSchemaRoot),
    }
}

/// Finds the complex type describing `layer` in a schema root.
fn find_layer_type<'a>(schema: &'a XmlElement, layer: &str) -> Option<&'a XmlElement> {
    let layer_local = local_name(layer);
    let complex_types: Vec<&XmlElement> = schema.children_named("complexType").collect();

    if let Some(element) = schema
        .children_named("element")
        .find(|e| e.attr("name") == Some(layer_local))
    {
        if let Some(inline) = element.child("complexType") {
            return Some(inline);
        }
        if let Some(type_name) = element.attr("type") {
            let wanted = local_name(type_name);
            if let Some(found) = complex_types
                .iter()
                .find(|ct| ct.attr("name") == Some(wanted))
            {
                return Some(found);
            }
        }
    }

    let conventional = format!("{layer_local}Type");
    if let Some(found) = complex_types
        .iter()
        .find(|ct| ct.attr("name") == Some(conventional.as_str()))
    {
        return Some(found);
    }

    // a lone type is taken even if its name does not match
    match complex_types.as_slice() {
        [only] => Some(only),
        _ => None,
    }
}

fn collect_elements<'a>(node: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    for child in node.elements() {
        match child.local_name() {
            "element" => out.push(child),
            "complexContent" | "extension" | "restriction" | "sequence" | "all" | "choice" => {
                collect_elements(child, out);
            },
            _ => {},
        }
    }
}

fn element_type(element: &XmlElement) -> Option<String> {
    if let Some(type_name) = element.attr("type") {
        return Some(type_name.to_string());
    }
    element
        .path(&["simpleType", "restriction"])
        .and_then(|restriction| restriction.attr("base"))
        .map(str::to_string)
}

/// Builds the schema of `layer` from a schema root.
///
/// Elements whose type is not understood are dropped. Only the first geometry property
/// becomes the layer geometry.
///
/// # Errors
///
/// Returns [`ResponseError::MissingLayerDefinition`] when the document does not describe the
/// layer.
pub fn layer_schema_from_document(
    schema: &XmlElement,
    layer: &str,
    options: SchemaOptions,
) -> Result<LayerSchema, ResponseError> {
    let complex_type =
        find_layer_type(schema, layer).ok_or_else(|| ResponseError::MissingLayerDefinition {
            layer: layer.to_string(),
        })?;

    let mut elements = Vec::new();
    collect_elements(complex_type, &mut elements);

    let mut declared = Vec::new();
    let mut geometry = None;
    for element in elements {
        let Some(name) = element.attr("name") else {
            continue;
        };
        let Some(type_name) = element_type(element) else {
            warn!("field {name} of layer {layer} has no type, dropped");
            continue;
        };
        if let Some(field_type) = FieldType::from_xsd(&type_name) {
            declared.push(FieldDescriptor {
                name: name.to_string(),
                field_type,
                nillable: element.attr("nillable") == Some("true")
                    || element.attr("minOccurs") == Some("0"),
            });
        } else if let Some(geometry_type) = GeometryType::from_gml_property_type(&type_name) {
            if geometry.is_none() {
                geometry = Some(GeometryFieldDescriptor {
                    name: name.to_string(),
                    geometry_type,
                });
            } else {
                debug!("extra geometry property {name} of layer {layer} ignored");
            }
        } else {
            warn!("field {name} of layer {layer} has unsupported type {type_name}, dropped");
        }
    }

    let mut layer_schema = LayerSchema::new(declared, geometry, options);
    layer_schema.target_namespace = schema.attr("targetNamespace").map(str::to_string);
    Ok(layer_schema)
}

fn infer_type(value: &RawValue) -> FieldType {
    match value {
        RawValue::Bool(_) => FieldType::Boolean,
        RawValue::Integer(i) if i32::try_from(*i).is_ok() => FieldType::Int32,
        RawValue::Integer(_) => FieldType::Int64,
        RawValue::Real(_) => FieldType::Float64,
        RawValue::Null => FieldType::String,
        RawValue::Text(text) => {
            let text = text.trim();
            if text == "true" || text == "false" {
                FieldType::Boolean
            } else if let Ok(i) = text.parse::<i64>() {
                infer_type(&RawValue::Integer(i))
            } else if text.parse::<f64>().is_ok() {
                FieldType::Float64
            } else {
                FieldType::String
            }
        },
    }
}

/// Infers a schema from the properties of one sample feature.
#[must_use]
pub fn infer_schema(
    properties: &[(String, RawValue)],
    geometry_name: Option<&str>,
    options: SchemaOptions,
) -> LayerSchema {
    let declared = properties
        .iter()
        .map(|(name, value)| FieldDescriptor::new(name.clone(), infer_type(value)))
        .collect();
    let geometry = geometry_name.map(|name| GeometryFieldDescriptor {
        name: name.to_string(),
        geometry_type: GeometryType::Unknown,
    });
    let mut schema = LayerSchema::new(declared, geometry, options);
    schema.inferred = true;
    schema
}

/// A resolved schema and the document it was read from.
#[derive(Debug, Clone)]
pub struct CachedSchema {
    pub schema: Arc<LayerSchema>,
    pub document: XmlElement,
}

/// Schemas resolved so far, keyed by layer name.
///
/// Inferred schemas are never stored, so a later successful describe replaces them.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<String, CachedSchema>>,
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, layer: &str) -> Option<CachedSchema> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(layer)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, layer: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(layer)
    }

    /// Stores a schema; a concurrent insert for the same layer simply wins.
    pub fn insert(&self, layer: impl Into<String>, schema: LayerSchema, document: XmlElement) {
        if schema.inferred {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                layer.into(),
                CachedSchema {
                    schema: Arc::new(schema),
                    document,
                },
            );
    }

    /// Resolves every layer of `layers` described by `document`.
    ///
    /// Returns the layers that were found in the document.
    pub fn populate(
        &self,
        document: &XmlElement,
        layers: &[String],
        options: SchemaOptions,
    ) -> Vec<String> {
        let mut found = Vec::new();
        for layer in layers {
            let single_layer = layers.len() == 1;
            let defined = single_layer
                || document
                    .children_named("element")
                    .any(|e| e.attr("name") == Some(local_name(layer)));
            if !defined {
                continue;
            }
            match layer_schema_from_document(document, layer, options) {
                Ok(schema) => {
                    self.insert(layer.clone(), schema, document.clone());
                    found.push(layer.clone());
                },
                Err(err) => debug!("{err}"),
            }
        }
        found
    }
}
