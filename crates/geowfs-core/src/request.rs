//! Key-value-pair URLs for the WFS operations.
//!
//! Parameters are always added in the same order so that a given query maps to exactly one
//! URL. Servers do not care, but caches and recorded fixtures do.

use crate::capabilities::WfsVersion;
use crate::url::{add_kvp, encode_value, remove_param};

/// Parameters that only make sense on a `GetFeature` request and must not leak into the
/// endpoint base URL.
const QUERY_PARAMS: &[&str] = &[
    "TYPENAME",
    "TYPENAMES",
    "FILTER",
    "PROPERTYNAME",
    "MAXFEATURES",
    "COUNT",
    "STARTINDEX",
    "SORTBY",
    "RESULTTYPE",
    "SRSNAME",
];

/// Strips query-specific parameters from a user-supplied URL.
///
/// `OUTPUTFORMAT` and vendor parameters are kept.
#[must_use]
pub fn endpoint_base(url: &str) -> String {
    QUERY_PARAMS
        .iter()
        .fold(url.to_string(), |url, key| remove_param(&url, key))
}

/// `GetCapabilities` URL. A `VERSION` already present is kept where it is.
#[must_use]
pub fn capabilities_url(base: &str) -> String {
    let url = remove_param(&endpoint_base(base), "OUTPUTFORMAT");
    let url = add_kvp(&url, "SERVICE", "WFS");
    add_kvp(&url, "REQUEST", "GetCapabilities")
}

/// `DescribeFeatureType` URL for one or several layers.
#[must_use]
pub fn describe_url(base: &str, version: WfsVersion, layers: &[String]) -> String {
    let url = remove_param(base, "OUTPUTFORMAT");
    let url = add_kvp(&url, "SERVICE", "WFS");
    let url = add_kvp(&url, "VERSION", version.as_str());
    let url = add_kvp(&url, "REQUEST", "DescribeFeatureType");
    add_kvp(&url, "TYPENAME", &encode_value(&layers.join(",")))
}

/// Sort key pushed to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub property: String,
    pub ascending: bool,
}

impl SortKey {
    #[must_use]
    pub fn new(property: impl Into<String>, ascending: bool) -> Self {
        Self {
            property: property.into(),
            ascending,
        }
    }
}

/// Everything a `GetFeature` request can carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetFeatureParams {
    /// More than one type name makes a join query.
    pub type_names: Vec<String>,
    /// Complete filter document, not yet URL-encoded.
    pub filter: Option<String>,
    pub property_names: Vec<String>,
    pub sort_by: Vec<SortKey>,
    pub srs_name: Option<String>,
    pub start_index: Option<u64>,
    pub count: Option<u64>,
    /// `RESULTTYPE=hits`.
    pub hits: bool,
}

impl GetFeatureParams {
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_names: vec![type_name.into()],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn join(type_names: Vec<String>) -> Self {
        Self {
            type_names,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_join(&self) -> bool {
        self.type_names.len() > 1
    }

    fn sort_value(&self) -> Option<String> {
        if self.sort_by.is_empty() {
            return None;
        }
        let keys: Vec<String> = self
            .sort_by
            .iter()
            .map(|key| {
                let direction = if key.ascending { "ASC" } else { "DESC" };
                format!("{} {direction}", key.property)
            })
            .collect();
        Some(encode_value(&keys.join(",")))
    }
}

/// Builds a `GetFeature` URL.
///
/// Single-layer requests place `FILTER`, `PROPERTYNAME`, `SORTBY` and `SRSNAME` before the
/// paging window; join requests place the window right after `TYPENAMES`.
#[must_use]
pub fn get_feature_url(base: &str, version: WfsVersion, params: &GetFeatureParams) -> String {
    let mut url = add_kvp(base, "SERVICE", "WFS");
    url = add_kvp(&url, "VERSION", version.as_str());
    url = add_kvp(&url, "REQUEST", "GetFeature");

    let type_names = if params.is_join() {
        format!("({})", params.type_names.join(","))
    } else {
        params.type_names.join(",")
    };
    url = add_kvp(&url, version.typename_key(), &encode_value(&type_names));

    let filter = params.filter.as_deref().map(encode_value);
    let window = |mut url: String| {
        if let Some(start) = params.start_index {
            url = add_kvp(&url, "STARTINDEX", &start.to_string());
        }
        if let Some(count) = params.count {
            url = add_kvp(&url, version.count_key(), &count.to_string());
        }
        url
    };

    if params.is_join() {
        url = window(url);
        if let Some(filter) = &filter {
            url = add_kvp(&url, "FILTER", filter);
        }
        if let Some(sort) = params.sort_value() {
            url = add_kvp(&url, "SORTBY", &sort);
        }
    } else {
        if let Some(filter) = &filter {
            url = add_kvp(&url, "FILTER", filter);
        }
        if !params.property_names.is_empty() {
            url = add_kvp(
                &url,
                "PROPERTYNAME",
                &encode_value(&params.property_names.join(",")),
            );
        }
        if let Some(sort) = params.sort_value() {
            url = add_kvp(&url, "SORTBY", &sort);
        }
        if let Some(srs) = &params.srs_name {
            url = add_kvp(&url, "SRSNAME", &encode_value(srs));
        }
        url = window(url);
    }

    if params.hits {
        url = add_kvp(&url, "RESULTTYPE", "hits");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_strip_query_parameters() {
        assert_eq!(
            capabilities_url("/vsimem/x"),
            "/vsimem/x?SERVICE=WFS&REQUEST=GetCapabilities"
        );
        assert_eq!(
            capabilities_url("/vsimem/x?TYPENAME=a&VERSION=1.1.0&OUTPUTFORMAT=json"),
            "/vsimem/x?VERSION=1.1.0&SERVICE=WFS&REQUEST=GetCapabilities"
        );
        assert_eq!(
            endpoint_base("/vsimem/x?OUTPUTFORMAT=application/json&TYPENAMES=a&MAXFEATURES=3"),
            "/vsimem/x?OUTPUTFORMAT=application/json"
        );
    }

    #[test]
    fn describe_joins_layer_names() {
        assert_eq!(
            describe_url(
                "/vsimem/wfs_endpoint?OUTPUTFORMAT=application/json",
                WfsVersion::V2_0_0,
                &["foo:lyr1".into(), "foo:lyr2".into()]
            ),
            "/vsimem/wfs_endpoint?SERVICE=WFS&VERSION=2.0.0&REQUEST=DescribeFeatureType&TYPENAME=foo:lyr1,foo:lyr2"
        );
    }

    #[test]
    fn single_layer_parameter_order() {
        let mut params = GetFeatureParams::new("my_layer");
        params.property_names = vec!["str".into(), "boolean".into(), "shape".into()];
        assert_eq!(
            get_feature_url("/vsimem/wfs_endpoint", WfsVersion::V1_1_0, &params),
            "/vsimem/wfs_endpoint?SERVICE=WFS&VERSION=1.1.0&REQUEST=GetFeature&TYPENAME=my_layer&PROPERTYNAME=str,boolean,shape"
        );

        let mut params = GetFeatureParams::new("foo:lyr");
        params.srs_name = Some("urn:ogc:def:crs:EPSG::4258".into());
        params.count = Some(1);
        assert_eq!(
            get_feature_url("/vsimem/e", WfsVersion::V2_0_0, &params),
            "/vsimem/e?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=foo:lyr&SRSNAME=urn:ogc:def:crs:EPSG::4258&COUNT=1"
        );

        let mut params = GetFeatureParams::new("my_layer");
        params.hits = true;
        params.sort_by = vec![SortKey::new("str", false)];
        assert_eq!(
            get_feature_url("/vsimem/e", WfsVersion::V1_1_0, &params),
            "/vsimem/e?SERVICE=WFS&VERSION=1.1.0&REQUEST=GetFeature&TYPENAME=my_layer&SORTBY=str%20DESC&RESULTTYPE=hits"
        );
    }

    #[test]
    fn output_format_stays_first() {
        let mut params = GetFeatureParams::new("my_layer");
        params.start_index = Some(0);
        params.count = Some(2);
        assert_eq!(
            get_feature_url(
                "/vsimem/wfs200_endpoint_json?OUTPUTFORMAT=application/json",
                WfsVersion::V2_0_0,
                &params
            ),
            "/vsimem/wfs200_endpoint_json?OUTPUTFORMAT=application/json&SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=my_layer&STARTINDEX=0&COUNT=2"
        );
    }

    #[test]
    fn join_window_comes_before_filter() {
        let mut params = GetFeatureParams::join(vec!["lyr1".into(), "lyr2".into()]);
        params.start_index = Some(0);
        params.count = Some(1);
        params.filter = Some("<Filter/>".into());
        params.sort_by = vec![SortKey::new("str", false)];
        assert_eq!(
            get_feature_url("/vsimem/j", WfsVersion::V2_0_0, &params),
            "/vsimem/j?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=%28lyr1,lyr2%29&STARTINDEX=0&COUNT=1&FILTER=%3CFilter%2F%3E&SORTBY=str%20DESC"
        );
    }
}
