//! Decoding of `GetFeature` responses.
//!
//! A [`ResponseDecoder`] yields one record per pull. GML bodies are read either with the
//! streaming decoder, which keeps at most one feature in memory, or with the buffered decoder,
//! which builds the whole document first. JSON and multipart bodies are always decoded in one
//! go since their format crates work on complete payloads.

pub mod buffered;
pub mod json;
pub mod multipart;
pub mod streaming;

use geo_types::Geometry;
use geowfs_core_common::FetchResponse;
use log::debug;
use wfs_shared::{FeatureFormatError, RawValue, parse_count};

pub use buffered::BufferedGmlDecoder;
pub use json::CollectionDecoder;
pub use streaming::StreamingGmlDecoder;

use crate::error::{ResponseError, Result};
use crate::geometry::swap_axes;
use crate::gml::{GmlError, find_geometry, geometry_srs_name, parse_geometry};
use crate::srs::Srs;
use crate::xml::{XmlElement, parse_document, prefix};

/// One feature as found in a response, before schema coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFeature {
    /// Qualified element name of the feature (its layer).
    pub type_name: String,
    /// `gml:id`, `fid` or `GeoJSON` id.
    pub id: Option<String>,
    pub properties: Vec<(String, RawValue)>,
    /// Geometries in `x y` order, keyed by property name.
    pub geometries: Vec<(String, Geometry<f64>)>,
}

impl DecodedFeature {
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&RawValue> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn geometry_named(&self, name: &str) -> Option<&Geometry<f64>> {
        self.geometries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, geometry)| geometry)
    }
}

/// A single feature, or the members of a `wfs:Tuple` join result.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord {
    Feature(DecodedFeature),
    Tuple(Vec<DecodedFeature>),
}

impl DecodedRecord {
    /// The feature of a plain record, or the first member of a tuple.
    #[must_use]
    pub fn into_feature(self) -> Option<DecodedFeature> {
        match self {
            Self::Feature(feature) => Some(feature),
            Self::Tuple(members) => members.into_iter().next(),
        }
    }
}

/// Counters advertised by a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCounts {
    /// `numberMatched` / `numberOfFeatures`, when known.
    pub number_matched: Option<u64>,
    pub number_returned: Option<u64>,
}

/// Pull-based access to the records of one response.
pub trait ResponseDecoder {
    /// Returns the next record, or `None` once the response is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a response error when the body turns out to be malformed.
    fn next_record(&mut self) -> Result<Option<DecodedRecord>>;

    /// Counters read from the collection root.
    fn counts(&self) -> ResponseCounts;
}

/// How GML bodies are decoded and how coordinates are oriented.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Pull features one at a time instead of building the whole document.
    pub streaming: bool,
    /// Whether the layer SRS has latitude/longitude axis order.
    ///
    /// GML geometries without `srsName` use it to decide whether to swap. `GeoJSON` and CSV
    /// geometries are swapped whenever it is set.
    pub lat_long_order: bool,
    /// Type name given to features of formats that do not carry one.
    pub type_name: String,
}

/// Payload family of a `GetFeature` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Gml,
    Json,
    Multipart,
}

/// Classifies a body from its content type, falling back to sniffing the first bytes.
#[must_use]
pub fn payload_kind(content_type: Option<&str>, body: &[u8]) -> PayloadKind {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if content_type.starts_with("multipart/") {
        return PayloadKind::Multipart;
    }
    if content_type.contains("json") {
        return PayloadKind::Json;
    }
    let head = body.trim_ascii_start();
    if head.len() >= 13 && head[..13].eq_ignore_ascii_case(b"content-type:") {
        PayloadKind::Multipart
    } else if head.first() == Some(&b'{') {
        PayloadKind::Json
    } else {
        PayloadKind::Gml
    }
}

/// Builds the decoder matching `response`.
///
/// GML roots are checked eagerly, so a server exception or a foreign document fails here
/// rather than on the first pull.
///
/// # Errors
///
/// Returns the response errors of the selected format.
pub fn open_decoder(
    response: &FetchResponse,
    options: &DecodeOptions,
) -> Result<Box<dyn ResponseDecoder>> {
    if response.body.is_empty() {
        return Err(ResponseError::EmptyResponse.into());
    }
    let kind = payload_kind(response.content_type.as_deref(), &response.body);
    debug!("decoding {kind:?} response (streaming={})", options.streaming);
    Ok(match kind {
        PayloadKind::Json => Box::new(CollectionDecoder::from_json(&response.body, options)?),
        PayloadKind::Multipart => Box::new(multipart::decode_multipart(
            &response.body,
            response.content_type.as_deref(),
            options,
        )?),
        PayloadKind::Gml if options.streaming => Box::new(StreamingGmlDecoder::new(
            response.body.clone(),
            options.lat_long_order,
        )?),
        PayloadKind::Gml => Box::new(BufferedGmlDecoder::new(
            &response.body,
            options.lat_long_order,
        )?),
    })
}

/// Reads the feature count of a `RESULTTYPE=hits` response.
///
/// # Errors
///
/// Returns [`ResponseError::MissingNumberOfFeatures`] when the root carries no count and
/// [`ResponseError::InvalidNumberOfFeatures`] when the count is not a number.
pub fn parse_hits(body: &[u8]) -> Result<u64> {
    let root = parse_document(body)?;
    check_collection_root(root.local_name(), body)?;
    let value = root
        .attr("numberMatched")
        .or_else(|| root.attr("numberOfFeatures"))
        .ok_or(ResponseError::MissingNumberOfFeatures)?;
    parse_count(value).ok_or_else(|| {
        ResponseError::InvalidNumberOfFeatures {
            value: value.to_string(),
        }
        .into()
    })
}

/// Fails unless the root is a feature collection.
pub(crate) fn check_collection_root(local: &str, body: &[u8]) -> Result<()> {
    match local {
        "FeatureCollection" => Ok(()),
        "ServiceExceptionReport" | "ExceptionReport" => Err(ResponseError::ServerException {
            content: String::from_utf8_lossy(body).into_owned(),
        }
        .into()),
        _ => Err(ResponseError::MissingFeatureCollection.into()),
    }
}

pub(crate) fn counts_from(attr: impl Fn(&str) -> Option<String>) -> ResponseCounts {
    ResponseCounts {
        number_matched: attr("numberMatched")
            .or_else(|| attr("numberOfFeatures"))
            .and_then(|v| parse_count(&v)),
        number_returned: attr("numberReturned").and_then(|v| parse_count(&v)),
    }
}

/// Elements that only wrap features.
pub(crate) fn is_member_container(local: &str) -> bool {
    matches!(
        local,
        "featureMember" | "featureMembers" | "member" | "members" | "FeatureCollection"
            | "additionalObjects" | "SimpleFeatureCollection"
    )
}

/// Elements of a collection that never hold features.
pub(crate) fn is_collection_metadata(local: &str) -> bool {
    matches!(local, "boundedBy" | "truncatedResponse")
}

/// Decodes the members of a `wfs:Tuple`.
pub(crate) fn tuple_from_element(tuple: &XmlElement, lat_long_order: bool) -> Result<DecodedRecord> {
    let members = tuple
        .children_named("member")
        .filter_map(|member| member.elements().next())
        .map(|element| feature_from_element(element, lat_long_order))
        .collect::<Result<Vec<_>>>()?;
    Ok(DecodedRecord::Tuple(members))
}

/// Decodes a feature element.
///
/// Children in the GML namespace (`boundedBy`, `name`, ...) are not properties. Geometries are
/// swapped to `x y` when their `srsName` has lat/long order, or when they have none and
/// `lat_long_order` is set.
///
/// # Errors
///
/// Returns [`ResponseError::InvalidFeatures`] when a geometry cannot be read.
pub fn feature_from_element(element: &XmlElement, lat_long_order: bool) -> Result<DecodedFeature> {
    let id = element
        .attr("gml:id")
        .or_else(|| element.attr("fid"))
        .or_else(|| element.attr("id"))
        .map(str::to_string);

    let mut feature = DecodedFeature {
        type_name: element.name.clone(),
        id,
        ..DecodedFeature::default()
    };

    for child in element.elements() {
        if prefix(&child.name) == Some("gml") {
            continue;
        }
        let name = child.local_name().to_string();
        if let Some(geometry_element) = find_geometry(child) {
            let mut geometry = parse_geometry(geometry_element).map_err(geometry_error)?;
            let swap = geometry_srs_name(geometry_element)
                .map_or(lat_long_order, |srs| Srs::parse(srs).has_lat_long_order());
            if swap {
                swap_axes(&mut geometry);
            }
            feature.geometries.push((name, geometry));
        } else if child.attr("nil") == Some("true") || child.is_empty() {
            feature.properties.push((name, RawValue::Null));
        } else {
            feature
                .properties
                .push((name, RawValue::Text(child.text().trim().to_string())));
        }
    }
    Ok(feature)
}

fn geometry_error(err: GmlError) -> crate::error::WfsError {
    ResponseError::InvalidFeatures {
        source: FeatureFormatError::Geometry {
            message: err.to_string(),
            position: None,
        },
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;

    const PAGE: &str = r#"<wfs:FeatureCollection xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:foo="http://foo" xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" numberMatched="unknown" numberReturned="2" timeStamp="2015-04-17T14:14:24.859Z">
  <wfs:member>
    <foo:my_layer gml:id="my_layer.1">
      <gml:boundedBy><gml:Envelope><gml:lowerCorner>49 2</gml:lowerCorner><gml:upperCorner>49 2</gml:upperCorner></gml:Envelope></gml:boundedBy>
      <foo:str>str</foo:str>
      <foo:int>1</foo:int>
      <foo:empty xsi:nil="true"/>
      <foo:shape><gml:Point srsName="urn:ogc:def:crs:EPSG::4326" gml:id="my_layer.1.shape"><gml:pos>49 2</gml:pos></gml:Point></foo:shape>
    </foo:my_layer>
  </wfs:member>
  <wfs:member>
    <foo:my_layer gml:id="my_layer.2">
      <foo:str>str2</foo:str>
    </foo:my_layer>
  </wfs:member>
</wfs:FeatureCollection>"#;

    const EXCEPTION: &str = r#"<ServiceExceptionReport><ServiceException>Bad request</ServiceException></ServiceExceptionReport>"#;

    fn drain(mut decoder: Box<dyn ResponseDecoder>) -> Vec<DecodedRecord> {
        let mut records = Vec::new();
        while let Some(record) = decoder.next_record().unwrap() {
            records.push(record);
        }
        records
    }

    fn options(streaming: bool) -> DecodeOptions {
        DecodeOptions {
            streaming,
            lat_long_order: true,
            type_name: "my_layer".into(),
        }
    }

    #[test]
    fn streaming_and_buffered_agree() {
        let response = FetchResponse::new(PAGE);
        let streaming = open_decoder(&response, &options(true)).unwrap();
        assert_eq!(streaming.counts().number_matched, None);
        assert_eq!(streaming.counts().number_returned, Some(2));
        let buffered = open_decoder(&response, &options(false)).unwrap();
        let a = drain(streaming);
        let b = drain(buffered);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);

        let Some(DecodedRecord::Feature(first)) = a.into_iter().next() else {
            panic!("expected a feature");
        };
        assert_eq!(first.id.as_deref(), Some("my_layer.1"));
        assert_eq!(first.type_name, "foo:my_layer");
        assert_eq!(first.property("str"), Some(&RawValue::Text("str".into())));
        assert_eq!(first.property("empty"), Some(&RawValue::Null));
        assert!(first.property("boundedBy").is_none());
        assert_eq!(
            first.geometry_named("shape"),
            Some(&Geometry::Point(Point::new(2.0, 49.0)))
        );
    }

    #[test]
    fn exception_root_is_reported() {
        for streaming in [true, false] {
            let err = open_decoder(&FetchResponse::new(EXCEPTION), &options(streaming))
                .err()
                .unwrap();
            assert!(err.to_string().starts_with("Error returned by server"), "{err}");
        }
    }

    #[test]
    fn foreign_root_is_reported() {
        for streaming in [true, false] {
            let err = open_decoder(&FetchResponse::new("<foo/>"), &options(streaming))
                .err()
                .unwrap();
            assert_eq!(err.to_string(), "Cannot find <FeatureCollection>");
        }
    }

    #[test]
    fn truncated_body_fails_on_pull() {
        let body = "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs\"><gml:featureMember xmlns:gml=\"http://www.opengis.net/gml\"><foo:lyr xmlns:foo=\"http://foo\">";
        let mut decoder = open_decoder(&FetchResponse::new(body), &options(true)).unwrap();
        let err = decoder.next_record().unwrap_err();
        assert!(err.to_string().contains("Invalid XML content"), "{err}");
        assert!(open_decoder(&FetchResponse::new(body), &options(false)).is_err());
    }

    #[test]
    fn tuples() {
        let body = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:foo="http://foo" numberMatched="1" numberReturned="1">
  <wfs:member>
    <wfs:Tuple>
      <wfs:member><foo:lyr1 gml:id="lyr1-100"><foo:str>123.4</foo:str></foo:lyr1></wfs:member>
      <wfs:member><foo:lyr2 gml:id="lyr2-101"><foo:str2>123.4</foo:str2></foo:lyr2></wfs:member>
    </wfs:Tuple>
  </wfs:member>
</wfs:FeatureCollection>"#;
        for streaming in [true, false] {
            let records = drain(open_decoder(&FetchResponse::new(body), &options(streaming)).unwrap());
            let [DecodedRecord::Tuple(members)] = records.as_slice() else {
                panic!("expected one tuple");
            };
            assert_eq!(members.len(), 2);
            assert_eq!(members[0].type_name, "foo:lyr1");
            assert_eq!(members[1].id.as_deref(), Some("lyr2-101"));
        }
    }

    #[test]
    fn hits() {
        assert_eq!(
            parse_hits(br#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" numberOfFeatures="3"/>"#).unwrap(),
            3
        );
        assert_eq!(
            parse_hits(br#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" numberMatched="3" numberReturned="0"/>"#).unwrap(),
            3
        );
        let err = parse_hits(b"<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs\"/>").unwrap_err();
        assert!(err.to_string().starts_with("Cannot find numberMatched"));
        let err = parse_hits(b"<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs\" numberOfFeatures=\"x\"/>").unwrap_err();
        assert_eq!(err.to_string(), "Invalid feature count 'x'");
        assert!(parse_hits(b"").is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(payload_kind(Some("application/json; subtype=geojson"), b"<"), PayloadKind::Json);
        assert_eq!(payload_kind(None, b"  {\"type\":1}"), PayloadKind::Json);
        assert_eq!(
            payload_kind(None, b"Content-Type: multipart/mixed; boundary=\"b\""),
            PayloadKind::Multipart
        );
        assert_eq!(payload_kind(Some("text/xml"), b"<a/>"), PayloadKind::Gml);
    }
}
