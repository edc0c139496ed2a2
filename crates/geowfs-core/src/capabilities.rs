//! Parsed `GetCapabilities` documents.
//!
//! A [`Capabilities`] value is built once per datasource and shared read-only by every layer
//! through a [`CapabilitiesSnapshot`]. It keeps the parsed document around so the description
//! file can embed it unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::ResponseError;
use crate::geometry::Extent;
use crate::xml::{XmlElement, parse_document};

/// Immutable capabilities shared by a datasource and its layers.
pub type CapabilitiesSnapshot = Arc<Capabilities>;

/// Protocol version negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WfsVersion {
    V1_0_0,
    V1_1_0,
    V2_0_0,
}

impl WfsVersion {
    /// Parses a version attribute; anything unrecognised is treated as 1.1.0.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.starts_with("1.0") {
            Self::V1_0_0
        } else if text.starts_with("2.") {
            Self::V2_0_0
        } else {
            Self::V1_1_0
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_0_0 => "1.0.0",
            Self::V1_1_0 => "1.1.0",
            Self::V2_0_0 => "2.0.0",
        }
    }

    #[must_use]
    pub fn is_2_0(self) -> bool {
        self == Self::V2_0_0
    }

    /// The filter encoding spoken at this version.
    #[must_use]
    pub fn filter_dialect(self) -> FilterDialect {
        match self {
            Self::V1_0_0 => FilterDialect::Fes10,
            Self::V1_1_0 => FilterDialect::Fes11,
            Self::V2_0_0 => FilterDialect::Fes20,
        }
    }

    /// `TYPENAMES` for 2.0, `TYPENAME` before.
    #[must_use]
    pub fn typename_key(self) -> &'static str {
        if self.is_2_0() { "TYPENAMES" } else { "TYPENAME" }
    }

    /// `COUNT` for 2.0, `MAXFEATURES` before.
    #[must_use]
    pub fn count_key(self) -> &'static str {
        if self.is_2_0() { "COUNT" } else { "MAXFEATURES" }
    }
}

impl fmt::Display for WfsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter encoding profile, selected once from the negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDialect {
    Fes10,
    Fes11,
    Fes20,
}

impl FilterDialect {
    #[must_use]
    pub fn filter_namespace(self) -> &'static str {
        match self {
            Self::Fes10 | Self::Fes11 => "http://www.opengis.net/ogc",
            Self::Fes20 => "http://www.opengis.net/fes/2.0",
        }
    }

    #[must_use]
    pub fn gml_namespace(self) -> &'static str {
        match self {
            Self::Fes10 | Self::Fes11 => "http://www.opengis.net/gml",
            Self::Fes20 => "http://www.opengis.net/gml/3.2",
        }
    }

    /// Element naming a property inside a filter.
    #[must_use]
    pub fn property_element(self) -> &'static str {
        match self {
            Self::Fes10 | Self::Fes11 => "PropertyName",
            Self::Fes20 => "ValueReference",
        }
    }

    #[must_use]
    pub fn is_fes20(self) -> bool {
        self == Self::Fes20
    }
}

/// HTTP endpoints advertised for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationEndpoints {
    pub get: Option<String>,
    pub post: Option<String>,
}

/// Filter operators the server advertises.
///
/// `None` for a category means the server did not describe it, in which case every operator
/// of that category is assumed to work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCapabilities {
    pub spatial_operators: Option<BTreeSet<String>>,
    pub comparison_operators: Option<BTreeSet<String>>,
    pub has_functions: bool,
}

/// Normalizes operator spellings across versions (`PropertyIsEqualTo`, `EqualTo`,
/// `LessThanEqualTo`, `Simple_Comparisons` members).
fn normalize_operator(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_prefix("PropertyIs").unwrap_or(name);
    match name {
        "LessThanEqualTo" => "LessThanOrEqualTo".to_string(),
        "GreaterThanEqualTo" => "GreaterThanOrEqualTo".to_string(),
        "NullCheck" => "Null".to_string(),
        "Intersect" => "Intersects".to_string(),
        other => other.to_string(),
    }
}

impl FilterCapabilities {
    /// Whether a comparison operator (`EqualTo`, `Like`, `Null`, ...) may be sent.
    #[must_use]
    pub fn supports_comparison(&self, operator: &str) -> bool {
        self.comparison_operators
            .as_ref()
            .is_none_or(|ops| ops.contains(&normalize_operator(operator)))
    }

    /// Whether a spatial operator (`BBOX`, `Intersects`, `DWithin`, ...) may be sent.
    #[must_use]
    pub fn supports_spatial(&self, operator: &str) -> bool {
        self.spatial_operators.as_ref().is_none_or(|ops| {
            let wanted = normalize_operator(operator);
            ops.iter().any(|op| op.eq_ignore_ascii_case(&wanted))
        })
    }

    fn parse(element: &XmlElement) -> Self {
        let mut caps = Self::default();

        if let Some(spatial) = element.find("SpatialOperators") {
            caps.spatial_operators = Some(
                spatial
                    .elements()
                    .filter_map(|op| op.attr("name").map(normalize_operator))
                    .collect(),
            );
        } else if let Some(spatial) = element.find("Spatial_Operators") {
            caps.spatial_operators = Some(
                spatial
                    .elements()
                    .map(|op| normalize_operator(op.local_name()))
                    .collect(),
            );
        }

        if let Some(comparison) = element.find("ComparisonOperators") {
            caps.comparison_operators = Some(
                comparison
                    .elements()
                    .map(|op| {
                        op.attr("name")
                            .map_or_else(|| normalize_operator(&op.text()), normalize_operator)
                    })
                    .collect(),
            );
        } else if let Some(comparison) = element.find("Comparison_Operators") {
            let mut ops = BTreeSet::new();
            for op in comparison.elements() {
                if op.local_name() == "Simple_Comparisons" {
                    ops.extend(
                        [
                            "EqualTo",
                            "NotEqualTo",
                            "LessThan",
                            "GreaterThan",
                            "LessThanOrEqualTo",
                            "GreaterThanOrEqualTo",
                        ]
                        .map(String::from),
                    );
                } else {
                    ops.insert(normalize_operator(op.local_name()));
                }
            }
            caps.comparison_operators = Some(ops);
        }

        caps.has_functions = element
            .find("Functions")
            .is_some_and(|functions| !functions.is_empty());
        caps
    }
}

/// One advertised feature type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerCapability {
    /// Name as advertised, prefix included.
    pub name: String,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
    pub default_srs: Option<String>,
    pub other_srs: Vec<String>,
    pub wgs84_bbox: Option<Extent>,
    /// Namespace URI bound to the name prefix, when declared.
    pub namespace_uri: Option<String>,
}

impl LayerCapability {
    /// Local part of the layer name.
    #[must_use]
    pub fn local_name(&self) -> &str {
        crate::xml::local_name(&self.name)
    }

    /// Name prefix, if the layer name carries one.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        crate::xml::prefix(&self.name)
    }

    /// TITLE, ABSTRACT and KEYWORD_n metadata items.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        if let Some(title) = &self.title {
            metadata.insert("TITLE".to_string(), title.clone());
        }
        if let Some(abstract_text) = &self.abstract_text {
            metadata.insert("ABSTRACT".to_string(), abstract_text.clone());
        }
        for (idx, keyword) in self.keywords.iter().enumerate() {
            metadata.insert(format!("KEYWORD_{}", idx + 1), keyword.clone());
        }
        metadata
    }
}

/// A parsed capabilities document.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub version: WfsVersion,
    /// Endpoint used for every subsequent request.
    pub base_url: String,
    pub title: Option<String>,
    /// Endpoints keyed by operation name.
    pub operations: BTreeMap<String, OperationEndpoints>,
    pub paging_supported: bool,
    pub default_page_size: Option<u64>,
    pub joins_supported: bool,
    pub hits_supported: bool,
    pub output_formats: Vec<String>,
    pub layers: Vec<LayerCapability>,
    pub filter: FilterCapabilities,
    /// `xmlns:prefix` declarations found anywhere in the document.
    pub namespaces: BTreeMap<String, String>,
    /// Parsed document, kept for the description file.
    pub document: XmlElement,
    /// Response body as received.
    pub raw: String,
}

impl Capabilities {
    /// Parses a capabilities response.
    ///
    /// `request_url` is the base URL the document was fetched from; it is used when the
    /// document does not advertise a `GetCapabilities` endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`ResponseError`] for empty, malformed or exception responses, when the root
    /// is not `WFS_Capabilities`, when `FeatureTypeList` is missing, or when no base URL can
    /// be determined.
    pub fn parse(body: &[u8], request_url: Option<&str>) -> Result<Self, ResponseError> {
        let document = parse_document(body)?;
        let raw = String::from_utf8_lossy(body).into_owned();
        Self::from_document(document, raw, request_url)
    }

    /// Builds capabilities from an already parsed document.
    ///
    /// # Errors
    ///
    /// Same as [`Capabilities::parse`], minus the XML syntax failures.
    pub fn from_document(
        document: XmlElement,
        raw: String,
        request_url: Option<&str>,
    ) -> Result<Self, ResponseError> {
        match document.local_name() {
            "WFS_Capabilities" => {},
            "ServiceExceptionReport" | "ExceptionReport" => {
                return Err(ResponseError::ServerException { content: raw });
            },
            _ => {
                return Err(ResponseError::MissingRootElement {
                    element: "WFS_Capabilities".to_string(),
                });
            },
        }

        let feature_type_list = document
            .child("FeatureTypeList")
            .ok_or(ResponseError::MissingFeatureTypeList)?;

        let version = document
            .attr("version")
            .map_or(WfsVersion::V1_1_0, WfsVersion::parse);
        let namespaces = document.namespace_declarations();
        let operations = parse_operations(&document);

        let base_url = operations
            .get("GetCapabilities")
            .and_then(|endpoints| endpoints.get.clone())
            .or_else(|| request_url.map(str::to_string))
            .ok_or(ResponseError::MissingBaseUrl)?;

        let layers = feature_type_list
            .children_named("FeatureType")
            .filter_map(|ft| parse_feature_type(ft, &namespaces))
            .collect();

        let filter = document
            .child("Filter_Capabilities")
            .map(FilterCapabilities::parse)
            .unwrap_or_default();

        let constraints = collect_constraints(&document);
        let constraint_true = |name: &str| {
            constraints
                .get(name)
                .is_some_and(|value| value.eq_ignore_ascii_case("TRUE"))
        };
        let paging_supported = constraint_true("ImplementsResultPaging");
        let joins_supported = version.is_2_0() && constraint_true("ImplementsStandardJoins");
        let default_page_size = constraints
            .get("CountDefault")
            .and_then(|value| value.trim().parse().ok());

        let get_feature_params = operation_parameters(&document, "GetFeature");
        let hits_supported = version.is_2_0()
            || get_feature_params
                .get("resulttype")
                .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case("hits")));
        let mut output_formats = get_feature_params
            .get("outputformat")
            .cloned()
            .unwrap_or_default();
        if let Some(formats) = document.path(&["Capability", "Request", "GetFeature", "ResultFormat"]) {
            output_formats.extend(formats.elements().map(|f| f.local_name().to_string()));
        }

        let title = document
            .child("ServiceIdentification")
            .and_then(|s| s.child_text("Title"))
            .or_else(|| document.child("Service").and_then(|s| s.child_text("Title")));

        debug!(
            "capabilities: version {version}, base URL {base_url}, paging {paging_supported}, joins {joins_supported}"
        );

        Ok(Self {
            version,
            base_url,
            title,
            operations,
            paging_supported,
            default_page_size,
            joins_supported,
            hits_supported,
            output_formats,
            layers,
            filter,
            namespaces,
            document,
            raw,
        })
    }

    /// Whether the server advertises WFS-T.
    #[must_use]
    pub fn transactions_supported(&self) -> bool {
        self.operations.contains_key("Transaction")
    }

    /// Endpoint for POSTing transactions.
    #[must_use]
    pub fn transaction_url(&self) -> &str {
        self.operations
            .get("Transaction")
            .and_then(|endpoints| endpoints.post.as_deref())
            .unwrap_or(&self.base_url)
    }

    #[must_use]
    pub fn layer(&self, name: &str) -> Option<&LayerCapability> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    /// Service metadata (`TITLE`).
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.title
            .iter()
            .map(|title| ("TITLE".to_string(), title.clone()))
            .collect()
    }
}

fn href(element: &XmlElement) -> Option<String> {
    element
        .attr("xlink:href")
        .or_else(|| element.attr("href"))
        .or_else(|| element.attr("onlineResource"))
        .map(str::to_string)
}

fn parse_operations(document: &XmlElement) -> BTreeMap<String, OperationEndpoints> {
    let mut operations = BTreeMap::new();

    if let Some(metadata) = document.child("OperationsMetadata") {
        for operation in metadata.children_named("Operation") {
            let Some(name) = operation.attr("name") else {
                continue;
            };
            let http = operation.path(&["DCP", "HTTP"]);
            operations.insert(
                name.to_string(),
                OperationEndpoints {
                    get: http.and_then(|h| h.child("Get")).and_then(href),
                    post: http.and_then(|h| h.child("Post")).and_then(href),
                },
            );
        }
    }

    if let Some(request) = document.path(&["Capability", "Request"]) {
        for operation in request.elements() {
            let http = operation.path(&["DCPType", "HTTP"]);
            operations
                .entry(operation.local_name().to_string())
                .or_insert_with(|| OperationEndpoints {
                    get: http.and_then(|h| h.child("Get")).and_then(href),
                    post: http.and_then(|h| h.child("Post")).and_then(href),
                });
        }
    }

    operations
}

fn constraint_value(constraint: &XmlElement) -> Option<String> {
    constraint
        .child_text("DefaultValue")
        .or_else(|| constraint.path(&["AllowedValues", "Value"]).map(|v| v.text().trim().to_string()))
        .or_else(|| constraint.child_text("Value"))
}

/// Collects `Constraint` name/value pairs from `OperationsMetadata` and its operations.
fn collect_constraints(document: &XmlElement) -> BTreeMap<String, String> {
    let mut constraints = BTreeMap::new();
    let Some(metadata) = document.child("OperationsMetadata") else {
        return constraints;
    };
    let scopes = std::iter::once(metadata).chain(metadata.children_named("Operation"));
    for scope in scopes {
        for constraint in scope.children_named("Constraint") {
            if let (Some(name), Some(value)) = (constraint.attr("name"), constraint_value(constraint)) {
                constraints.entry(name.to_string()).or_insert(value);
            }
        }
    }
    constraints
}

/// Parameter values of one operation, keyed by lower-cased parameter name.
fn operation_parameters(document: &XmlElement, operation: &str) -> BTreeMap<String, Vec<String>> {
    let mut parameters = BTreeMap::new();
    let Some(metadata) = document.child("OperationsMetadata") else {
        return parameters;
    };
    let Some(op) = metadata
        .children_named("Operation")
        .find(|op| op.attr("name") == Some(operation))
    else {
        return parameters;
    };
    for parameter in op.children_named("Parameter") {
        let Some(name) = parameter.attr("name") else {
            continue;
        };
        let holder = parameter.child("AllowedValues").unwrap_or(parameter);
        let values = holder
            .children_named("Value")
            .map(|v| v.text().trim().to_string())
            .collect();
        parameters.insert(name.to_ascii_lowercase(), values);
    }
    parameters
}

fn parse_corner(text: &str) -> Option<(f64, f64)> {
    let mut parts = text.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y))) => Some((x, y)),
        _ => None,
    }
}

fn parse_bbox(feature_type: &XmlElement) -> Option<Extent> {
    if let Some(bbox) = feature_type.child("WGS84BoundingBox") {
        let lower = parse_corner(&bbox.child_text("LowerCorner")?)?;
        let upper = parse_corner(&bbox.child_text("UpperCorner")?)?;
        return Some(Extent::new(lower.0, lower.1, upper.0, upper.1));
    }
    let bbox = feature_type.child("LatLongBoundingBox")?;
    let coord = |name: &str| bbox.attr(name).and_then(|v| v.trim().parse::<f64>().ok());
    Some(Extent::new(coord("minx")?, coord("miny")?, coord("maxx")?, coord("maxy")?))
}

fn parse_feature_type(
    feature_type: &XmlElement,
    namespaces: &BTreeMap<String, String>,
) -> Option<LayerCapability> {
    let name = feature_type.child_text("Name").filter(|n| !n.is_empty())?;

    let default_srs = feature_type
        .child_text("DefaultSRS")
        .or_else(|| feature_type.child_text("DefaultCRS"))
        .or_else(|| feature_type.child_text("SRS"));
    let other_srs = feature_type
        .elements()
        .filter(|e| matches!(e.local_name(), "OtherSRS" | "OtherCRS"))
        .map(|e| e.text().trim().to_string())
        .collect();
    let keywords = feature_type
        .children_named("Keywords")
        .flat_map(|k| {
            let nested: Vec<String> = k
                .children_named("Keyword")
                .map(|kw| kw.text().trim().to_string())
                .collect();
            if nested.is_empty() {
                // 1.0 lists keywords as comma separated text
                k.text()
                    .split(',')
                    .map(|kw| kw.trim().to_string())
                    .filter(|kw| !kw.is_empty())
                    .collect()
            } else {
                nested
            }
        })
        .collect();

    let namespace_uri = crate::xml::prefix(&name).and_then(|prefix| {
        feature_type
            .namespace_declarations()
            .get(prefix)
            .or_else(|| namespaces.get(prefix))
            .cloned()
    });

    Some(LayerCapability {
        title: feature_type.child_text("Title"),
        abstract_text: feature_type.child_text("Abstract"),
        keywords,
        default_srs,
        other_srs,
        wgs84_bbox: parse_bbox(feature_type),
        namespace_uri,
        name,
    })
}
