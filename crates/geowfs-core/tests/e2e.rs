//! End-to-end tests: open a datasource against in-memory endpoints and drive it the way a
//! client application would.

use std::sync::{Arc, Mutex, PoisonError};

use geo_types::{Geometry, Point};
use geowfs_core::error::{QueryError, TransactionError};
use geowfs_core::{
    FeatureSource, FieldValue, OpenOptions, TransactionState, WfsConfig, WfsDataSource, WfsError,
};
use geowfs_core_common::{FetchRequest, FetchResponse, Fetcher, MemoryFetcher, TransportError};

const ENDPOINT: &str = "/vsimem/wfs_endpoint";
const CAPS_URL: &str = "/vsimem/wfs_endpoint?SERVICE=WFS&REQUEST=GetCapabilities";
const DESCRIBE_URL: &str =
    "/vsimem/wfs_endpoint?SERVICE=WFS&VERSION=1.1.0&REQUEST=DescribeFeatureType&TYPENAME=my_layer";
const GET_FEATURE_URL: &str =
    "/vsimem/wfs_endpoint?SERVICE=WFS&VERSION=1.1.0&REQUEST=GetFeature&TYPENAME=my_layer";

const CAPS_110: &str = r#"<WFS_Capabilities version="1.1.0" xmlns:ows="http://www.opengis.net/ows" xmlns:ogc="http://www.opengis.net/ogc" xmlns:xlink="http://www.w3.org/1999/xlink">
  <ows:ServiceIdentification><ows:Title>My service</ows:Title></ows:ServiceIdentification>
  <ows:OperationsMetadata>
    <ows:Operation name="Transaction">
      <ows:DCP><ows:HTTP><ows:Post xlink:href="/vsimem/wfs_endpoint"/></ows:HTTP></ows:DCP>
    </ows:Operation>
  </ows:OperationsMetadata>
  <FeatureTypeList>
    <FeatureType>
      <Name>my_layer</Name>
      <Title>title</Title>
      <Abstract>abstract</Abstract>
      <DefaultSRS>urn:ogc:def:crs:EPSG::4326</DefaultSRS>
      <ows:WGS84BoundingBox>
        <ows:LowerCorner>-180.0 -90.0</ows:LowerCorner>
        <ows:UpperCorner>180.0 90.0</ows:UpperCorner>
      </ows:WGS84BoundingBox>
    </FeatureType>
  </FeatureTypeList>
  <ogc:Filter_Capabilities>
    <ogc:Scalar_Capabilities>
      <ogc:ComparisonOperators>
        <ogc:ComparisonOperator>EqualTo</ogc:ComparisonOperator>
      </ogc:ComparisonOperators>
    </ogc:Scalar_Capabilities>
  </ogc:Filter_Capabilities>
</WFS_Capabilities>"#;

const MY_LAYER_SCHEMA: &str = r#"<xsd:schema xmlns:foo="http://foo" xmlns:gml="http://www.opengis.net/gml" xmlns:xsd="http://www.w3.org/2001/XMLSchema" elementFormDefault="qualified" targetNamespace="http://foo">
  <xsd:import namespace="http://www.opengis.net/gml" schemaLocation="http://foo/schemas/gml/3.1.1/base/gml.xsd"/>
  <xsd:complexType name="my_layerType">
    <xsd:complexContent>
      <xsd:extension base="gml:AbstractFeatureType">
        <xsd:sequence>
          <xsd:element maxOccurs="1" minOccurs="0" name="str" nillable="true" type="xsd:string"/>
          <xsd:element maxOccurs="1" minOccurs="0" name="boolean" nillable="true" type="xsd:boolean"/>
          <xsd:element maxOccurs="1" minOccurs="0" name="short" nillable="true" type="xsd:short"/>
          <xsd:element maxOccurs="1" minOccurs="0" name="int" nillable="true" type="xsd:int"/>
          <xsd:element maxOccurs="1" minOccurs="0" name="float" nillable="true" type="xsd:float"/>
          <xsd:element maxOccurs="1" minOccurs="0" name="double" nillable="true" type="xsd:double"/>
          <xsd:element maxOccurs="1" minOccurs="0" name="dt" nillable="true" type="xsd:dateTime"/>
          <xsd:element maxOccurs="1" minOccurs="0" name="shape" nillable="true" type="gml:PointPropertyType"/>
        </xsd:sequence>
      </xsd:extension>
    </xsd:complexContent>
  </xsd:complexType>
  <xsd:element name="my_layer" substitutionGroup="gml:_Feature" type="foo:my_layerType"/>
</xsd:schema>"#;

const FEATURES_110: &str = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" xmlns:gml="http://www.opengis.net/gml" xmlns:foo="http://foo">
  <gml:featureMembers>
    <foo:my_layer gml:id="my_layer.1">
      <foo:str>foo</foo:str>
      <foo:int>1</foo:int>
      <foo:shape><gml:Point><gml:pos>49 2</gml:pos></gml:Point></foo:shape>
    </foo:my_layer>
    <foo:my_layer gml:id="my_layer.2">
      <foo:str>bar</foo:str>
      <foo:int>2</foo:int>
      <foo:shape><gml:Point><gml:pos>50 3</gml:pos></gml:Point></foo:shape>
    </foo:my_layer>
  </gml:featureMembers>
</wfs:FeatureCollection>"#;

const CAPS_200_PAGING: &str = r#"<WFS_Capabilities version="2.0.0" xmlns:ows="http://www.opengis.net/ows/1.1">
  <ows:OperationsMetadata>
    <ows:Operation name="GetFeature">
      <ows:Constraint name="CountDefault">
        <ows:NoValues/>
        <ows:DefaultValue>2</ows:DefaultValue>
      </ows:Constraint>
    </ows:Operation>
    <ows:Constraint name="ImplementsResultPaging">
      <ows:NoValues/><ows:DefaultValue>TRUE</ows:DefaultValue>
    </ows:Constraint>
  </ows:OperationsMetadata>
  <FeatureTypeList>
    <FeatureType>
      <Name>my_layer</Name>
      <DefaultCRS>urn:ogc:def:crs:EPSG::4326</DefaultCRS>
    </FeatureType>
  </FeatureTypeList>
</WFS_Capabilities>"#;

fn member_200(id: u32, text: &str) -> String {
    format!(
        "<wfs:member><foo:my_layer gml:id=\"my_layer.{id}\"><foo:str>{text}</foo:str></foo:my_layer></wfs:member>"
    )
}

fn collection_200(members: &[String]) -> String {
    format!(
        "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs/2.0\" xmlns:gml=\"http://www.opengis.net/gml/3.2\" xmlns:foo=\"http://foo\">{}</wfs:FeatureCollection>",
        members.concat()
    )
}

/// Answers requests whose key contains every needle of a route; later routes win.
#[derive(Default)]
struct Router {
    routes: Mutex<Vec<(Vec<String>, String)>>,
    log: Mutex<Vec<FetchRequest>>,
}

impl Router {
    fn route(&self, needles: &[&str], body: impl Into<String>) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((needles.iter().map(|n| (*n).to_string()).collect(), body.into()));
    }

    fn requests(&self) -> Vec<FetchRequest> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Fetcher for Router {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let key = MemoryFetcher::key_for(request);
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(needles, _)| needles.iter().all(|needle| key.contains(needle.as_str())))
            .map(|(_, body)| FetchResponse::new(body.clone()))
            .ok_or(TransportError::NotFound { url: key })
    }
}

fn endpoint_110() -> Arc<MemoryFetcher> {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert(CAPS_URL, CAPS_110);
    fetcher.insert(DESCRIBE_URL, MY_LAYER_SCHEMA);
    fetcher.insert(GET_FEATURE_URL, FEATURES_110);
    fetcher
}

fn open(fetcher: Arc<dyn Fetcher>, options: OpenOptions) -> WfsDataSource {
    WfsDataSource::open(&format!("WFS:{ENDPOINT}"), fetcher, &WfsConfig::default(), options)
        .unwrap()
}

fn drain(source: &mut dyn FeatureSource) -> Vec<geowfs_core::Feature> {
    let mut features = Vec::new();
    while let Some(feature) = source.next_feature().unwrap() {
        features.push(feature);
    }
    features
}

#[test]
fn open_failures() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let open = |fetcher: &Arc<MemoryFetcher>| {
        WfsDataSource::open(ENDPOINT, fetcher.clone(), &WfsConfig::default(), OpenOptions::new())
    };

    assert!(matches!(open(&fetcher), Err(WfsError::Transport(_))));
    for (body, message) in [
        ("", "Empty content returned by server"),
        ("<foo/>", "Cannot find <WFS_Capabilities>"),
        ("<WFS_Capabilities>\n</WFS_Capabilities>", "Cannot find <FeatureTypeList>"),
        ("<ServiceExceptionReport/>", "Error returned by server"),
    ] {
        fetcher.insert(CAPS_URL, body);
        let err = open(&fetcher).err().unwrap();
        assert!(err.to_string().starts_with(message), "{body}: {err}");
    }
}

#[test]
fn layers_schema_and_metadata() {
    let fetcher = endpoint_110();
    let mut ds = open(fetcher.clone(), OpenOptions::new());
    assert_eq!(ds.version().as_str(), "1.1.0");
    assert_eq!(ds.layer_count(), 1);
    assert_eq!(ds.metadata().get("TITLE").map(String::as_str), Some("My service"));

    let layer = ds.layer_by_name("my_layer").unwrap();
    assert_eq!(layer.metadata().get("ABSTRACT").map(String::as_str), Some("abstract"));
    let schema = layer.schema();
    assert_eq!(schema.field_count(), 8);
    assert_eq!(schema.fields[0].name, "gml_id");
    assert_eq!(schema.geometry_name(), Some("shape"));
    let _ = layer.schema();
    let describes = fetcher
        .requested_urls()
        .iter()
        .filter(|url| url.contains("DescribeFeatureType"))
        .count();
    assert_eq!(describes, 1);

    let mut hidden = open(endpoint_110(), OpenOptions::new().with_expose_gml_id(false));
    assert_eq!(hidden.layer(0).unwrap().schema().field_count(), 7);
}

#[test]
fn unknown_layers_and_type_name_restriction() {
    let fetcher = endpoint_110();
    let mut ds = WfsDataSource::open(
        &format!("{ENDPOINT}?TYPENAME=other_layer"),
        fetcher,
        &WfsConfig::default(),
        OpenOptions::new(),
    )
    .unwrap();
    assert_eq!(ds.layer_count(), 0);
    assert!(ds.layer_by_name("my_layer").is_none());
}

#[test]
fn schema_inferred_from_a_sample() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert(CAPS_URL, CAPS_110);
    fetcher.insert(format!("{GET_FEATURE_URL}&MAXFEATURES=1"), FEATURES_110);
    let mut ds = open(fetcher, OpenOptions::new());
    let schema = ds.layer(0).unwrap().schema();
    assert!(schema.inferred);
    assert!(schema.field("str").is_some());
    assert!(schema.field("int").is_some());
    assert_eq!(schema.geometry_name(), Some("shape"));
}

#[test]
fn failed_describe_is_retried_on_next_schema_call() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert(CAPS_URL, CAPS_110);
    fetcher.insert(DESCRIBE_URL, "<invalid_xml");
    let mut ds = open(fetcher.clone(), OpenOptions::new());
    let layer = ds.layer(0).unwrap();

    // neither the description nor the one-feature sample is usable
    assert_eq!(layer.schema().field_count(), 0);
    assert_eq!(layer.schema().field_count(), 0);

    fetcher.insert(DESCRIBE_URL, MY_LAYER_SCHEMA);
    let schema = layer.schema();
    assert_eq!(schema.field_count(), 8);
    assert!(!schema.inferred);
    let describes = fetcher
        .requested_urls()
        .iter()
        .filter(|url| url.as_str() == DESCRIBE_URL)
        .count();
    assert_eq!(describes, 3);
}

#[test]
fn gml_id_exposure_from_config_and_open_option() {
    fn field_count(config: &[(&str, &str)], options: OpenOptions) -> usize {
        let config = WfsConfig::from_pairs(config.iter().copied()).unwrap();
        let mut ds =
            WfsDataSource::open(&format!("WFS:{ENDPOINT}"), endpoint_110(), &config, options)
                .unwrap();
        ds.layer(0).unwrap().schema().field_count()
    }

    assert_eq!(field_count(&[], OpenOptions::new()), 8);
    assert_eq!(field_count(&[("GML_EXPOSE_GML_ID", "NO")], OpenOptions::new()), 7);
    // the open option wins over the configuration key
    assert_eq!(
        field_count(
            &[("GML_EXPOSE_GML_ID", "NO")],
            OpenOptions::new().with_expose_gml_id(true)
        ),
        8
    );
    assert_eq!(
        field_count(
            &[("GML_EXPOSE_GML_ID", "YES")],
            OpenOptions::new().with_expose_gml_id(false)
        ),
        7
    );
    assert_eq!(field_count(&[], OpenOptions::new().with_expose_gml_id(false)), 7);
}

#[test]
fn reads_features_with_server_and_client_filters() {
    let fetcher = endpoint_110();
    let mut ds = open(fetcher.clone(), OpenOptions::new());
    let layer = ds.layer(0).unwrap();

    let features = drain(layer);
    assert_eq!(features.len(), 2);
    assert_eq!(features[0].gml_id(), Some("my_layer.1"));
    assert_eq!(features[0].field("str"), Some(&FieldValue::from("foo")));
    assert_eq!(
        features[0].geometry(),
        Some(&Geometry::Point(Point::new(2.0, 49.0)))
    );

    // LIKE is not advertised, so the predicate runs on decoded features
    layer.set_attribute_filter(Some("str LIKE 'b%'")).unwrap();
    assert!(layer.filters_client_side());
    let features = drain(layer);
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].field("str"), Some(&FieldValue::from("bar")));
    assert_eq!(layer.feature_count().unwrap(), 1);

    fetcher.clear_requests();
    layer.set_attribute_filter(Some("str = 'foo'")).unwrap();
    assert!(!layer.filters_client_side());
    assert!(matches!(layer.next_feature(), Err(WfsError::Transport(_))));
    let urls = fetcher.requested_urls();
    let last = urls.last().unwrap();
    assert!(last.starts_with(GET_FEATURE_URL), "{last}");
    assert!(last.contains("&FILTER="), "{last}");
    assert!(last.contains("PropertyIsEqualTo"), "{last}");

    let err = layer.set_attribute_filter(Some("str = ")).unwrap_err();
    assert!(err.to_string().starts_with("SQL Expression Parsing Error"));
    layer.set_attribute_filter(None).unwrap();
    assert_eq!(drain(layer).len(), 2);
}

#[test]
fn pages_until_an_empty_page() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let page = |start: u32| {
        format!(
            "/vsimem/wfs200?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=my_layer&STARTINDEX={start}&COUNT=2"
        )
    };
    fetcher.insert("/vsimem/wfs200?SERVICE=WFS&REQUEST=GetCapabilities", CAPS_200_PAGING);
    fetcher.insert(
        "/vsimem/wfs200?SERVICE=WFS&VERSION=2.0.0&REQUEST=DescribeFeatureType&TYPENAME=my_layer",
        MY_LAYER_SCHEMA,
    );
    fetcher.insert(page(0), collection_200(&[member_200(1, "a"), member_200(2, "b")]));
    // a short page does not end the iteration
    fetcher.insert(page(2), collection_200(&[member_200(3, "c")]));
    fetcher.insert(page(3), collection_200(&[]));

    let mut ds = WfsDataSource::open(
        "/vsimem/wfs200",
        fetcher.clone(),
        &WfsConfig::default(),
        OpenOptions::new(),
    )
    .unwrap();
    let layer = ds.layer(0).unwrap();
    let features = drain(layer);
    let ids: Vec<_> = features.iter().filter_map(|f| f.gml_id()).collect();
    assert_eq!(ids, ["my_layer.1", "my_layer.2", "my_layer.3"]);
    let get_features = |fetcher: &MemoryFetcher| {
        fetcher
            .requested_urls()
            .iter()
            .filter(|url| url.contains("REQUEST=GetFeature"))
            .count()
    };
    assert_eq!(get_features(&fetcher), 3);

    // the full iteration taught the layer its count
    assert_eq!(layer.feature_count().unwrap(), 3);
    assert_eq!(get_features(&fetcher), 3);
}

#[test]
fn counts_with_hits_and_max_features() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("/vsimem/wfs200?SERVICE=WFS&REQUEST=GetCapabilities", CAPS_200_PAGING);
    fetcher.insert(
        "/vsimem/wfs200?SERVICE=WFS&VERSION=2.0.0&REQUEST=DescribeFeatureType&TYPENAME=my_layer",
        MY_LAYER_SCHEMA,
    );
    fetcher.insert(
        "/vsimem/wfs200?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=my_layer&RESULTTYPE=hits",
        "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs/2.0\" numberMatched=\"3\" numberReturned=\"0\"/>",
    );

    let mut ds = WfsDataSource::open(
        "/vsimem/wfs200",
        fetcher.clone(),
        &WfsConfig::default(),
        OpenOptions::new(),
    )
    .unwrap();
    assert_eq!(ds.layer(0).unwrap().feature_count().unwrap(), 3);

    let mut capped = WfsDataSource::open(
        "/vsimem/wfs200?MAXFEATURES=2",
        fetcher,
        &WfsConfig::default(),
        OpenOptions::new(),
    )
    .unwrap();
    assert_eq!(capped.layer(0).unwrap().feature_count().unwrap(), 2);
}

const GEOMETRY_ONLY_SCHEMA: &str = r#"<xsd:schema xmlns:foo="http://foo" xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:xsd="http://www.w3.org/2001/XMLSchema" targetNamespace="http://foo">
  <xsd:complexType name="my_layerType">
    <xsd:complexContent>
      <xsd:extension base="gml:AbstractFeatureType">
        <xsd:sequence>
          <xsd:element name="shape" type="gml:PointPropertyType"/>
        </xsd:sequence>
      </xsd:extension>
    </xsd:complexContent>
  </xsd:complexType>
  <xsd:element name="my_layer" substitutionGroup="gml:_Feature" type="foo:my_layerType"/>
</xsd:schema>"#;

#[test]
fn layer_without_primary_key_reads_the_known_count_at_once() {
    const BASE: &str = "/vsimem/wfs200_no_pk";
    const HITS_URL: &str = "/vsimem/wfs200_no_pk?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=my_layer&RESULTTYPE=hits";
    const ALL_URL: &str =
        "/vsimem/wfs200_no_pk?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=my_layer&COUNT=2";

    let point = |id: u32, x: u32| {
        format!(
            "<wfs:member><foo:my_layer gml:id=\"my_layer.{id}\"><foo:shape><gml:Point><gml:pos>{x} 2</gml:pos></gml:Point></foo:shape></foo:my_layer></wfs:member>"
        )
    };
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert(format!("{BASE}?SERVICE=WFS&REQUEST=GetCapabilities"), CAPS_200_PAGING);
    fetcher.insert(
        format!("{BASE}?SERVICE=WFS&VERSION=2.0.0&REQUEST=DescribeFeatureType&TYPENAME=my_layer"),
        GEOMETRY_ONLY_SCHEMA,
    );
    fetcher.insert(
        HITS_URL,
        "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs/2.0\" numberMatched=\"2\" numberReturned=\"0\"/>",
    );
    fetcher.insert(ALL_URL, collection_200(&[point(1, 49), point(2, 50)]));

    let mut ds =
        WfsDataSource::open(BASE, fetcher.clone(), &WfsConfig::default(), OpenOptions::new())
            .unwrap();
    let layer = ds.layer(0).unwrap();
    assert!(!layer.schema().has_primary_key);
    fetcher.clear_requests();

    assert_eq!(layer.feature_count().unwrap(), 2);
    let features = drain(layer);
    assert_eq!(features.len(), 2);
    assert_eq!(features[1].gml_id(), Some("my_layer.2"));
    // no STARTINDEX window: the server gives no stable order without a key
    assert_eq!(fetcher.requested_urls(), [HITS_URL, ALL_URL]);
}

const CAPS_200_JOINS: &str = r#"<WFS_Capabilities version="2.0.0" xmlns:ows="http://www.opengis.net/ows/1.1">
  <ows:OperationsMetadata>
    <ows:Constraint name="ImplementsStandardJoins">
      <ows:NoValues/><ows:DefaultValue>TRUE</ows:DefaultValue>
    </ows:Constraint>
  </ows:OperationsMetadata>
  <FeatureTypeList>
    <FeatureType><Name>lyr1</Name><DefaultCRS>urn:ogc:def:crs:EPSG::4326</DefaultCRS></FeatureType>
    <FeatureType><Name>lyr2</Name><DefaultCRS>urn:ogc:def:crs:EPSG::4326</DefaultCRS></FeatureType>
  </FeatureTypeList>
</WFS_Capabilities>"#;

const JOIN_SCHEMA: &str = r#"<xsd:schema xmlns:foo="http://foo" xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:xsd="http://www.w3.org/2001/XMLSchema" targetNamespace="http://foo">
  <xsd:complexType name="lyr1Type">
    <xsd:complexContent>
      <xsd:extension base="gml:AbstractFeatureType">
        <xsd:sequence>
          <xsd:element name="str" type="xsd:string"/>
          <xsd:element name="shape" type="gml:PointPropertyType"/>
        </xsd:sequence>
      </xsd:extension>
    </xsd:complexContent>
  </xsd:complexType>
  <xsd:element name="lyr1" substitutionGroup="gml:_Feature" type="foo:lyr1Type"/>
  <xsd:complexType name="lyr2Type">
    <xsd:complexContent>
      <xsd:extension base="gml:AbstractFeatureType">
        <xsd:sequence>
          <xsd:element name="str2" type="xsd:string"/>
          <xsd:element name="another_shape" type="gml:PointPropertyType"/>
        </xsd:sequence>
      </xsd:extension>
    </xsd:complexContent>
  </xsd:complexType>
  <xsd:element name="lyr2" substitutionGroup="gml:_Feature" type="foo:lyr2Type"/>
</xsd:schema>"#;

const JOIN_RESULT: &str = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:foo="http://foo">
  <wfs:member>
    <wfs:Tuple>
      <wfs:member><foo:lyr1 gml:id="lyr1-1"><foo:str>foo</foo:str><foo:shape><gml:Point srsName="urn:ogc:def:crs:EPSG::4326"><gml:pos>49 2</gml:pos></gml:Point></foo:shape></foo:lyr1></wfs:member>
      <wfs:member><foo:lyr2 gml:id="lyr2-1"><foo:str2>foo</foo:str2><foo:another_shape><gml:Point srsName="urn:ogc:def:crs:EPSG::4326"><gml:pos>50 3</gml:pos></gml:Point></foo:another_shape></foo:lyr2></wfs:member>
    </wfs:Tuple>
  </wfs:member>
</wfs:FeatureCollection>"#;

const JOIN_FILTER: &str = "%3CFilter%20xmlns%3D%22http:%2F%2Fwww.opengis.net%2Ffes%2F2.0%22%20xmlns:gml%3D%22http:%2F%2Fwww.opengis.net%2Fgml%2F3.2%22%3E%3CPropertyIsEqualTo%3E%3CValueReference%3Elyr1%2Fstr%3C%2FValueReference%3E%3CValueReference%3Elyr2%2Fstr2%3C%2FValueReference%3E%3C%2FPropertyIsEqualTo%3E%3C%2FFilter%3E";

fn join_tuple(id: u32, text: &str, x: u32) -> String {
    format!(
        "<wfs:member><wfs:Tuple>\
<wfs:member><foo:lyr1 gml:id=\"lyr1-{id}\"><foo:str>{text}</foo:str><foo:shape><gml:Point><gml:pos>{x} 2</gml:pos></gml:Point></foo:shape></foo:lyr1></wfs:member>\
<wfs:member><foo:lyr2 gml:id=\"lyr2-{id}\"><foo:str2>{text}</foo:str2></foo:lyr2></wfs:member>\
</wfs:Tuple></wfs:member>"
    )
}

fn join_endpoint(result: String) -> (Arc<Router>, WfsDataSource) {
    let router = Arc::new(Router::default());
    router.route(&["REQUEST=GetCapabilities"], CAPS_200_JOINS);
    router.route(&["REQUEST=DescribeFeatureType"], JOIN_SCHEMA);
    router.route(&["REQUEST=GetFeature", "TYPENAMES=%28lyr1,lyr2%29"], result);
    router.route(
        &["REQUEST=GetFeature", "TYPENAMES=%28lyr1,lyr2%29", "RESULTTYPE=hits"],
        "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs/2.0\" numberMatched=\"3\" numberReturned=\"0\"/>",
    );
    let ds = WfsDataSource::open(
        "/vsimem/wfs200_join",
        router.clone(),
        &WfsConfig::default(),
        OpenOptions::new(),
    )
    .unwrap();
    (router, ds)
}

fn get_feature_urls(router: &Router) -> Vec<String> {
    router
        .requests()
        .into_iter()
        .map(|request| request.url)
        .filter(|url| url.contains("REQUEST=GetFeature"))
        .collect()
}

#[test]
fn join_query() {
    let router = Arc::new(Router::default());
    router.route(&["REQUEST=GetCapabilities"], CAPS_200_JOINS);
    router.route(&["REQUEST=DescribeFeatureType"], JOIN_SCHEMA);
    router.route(&["REQUEST=GetFeature", "TYPENAMES=%28lyr1,lyr2%29"], JOIN_RESULT);

    let mut ds = WfsDataSource::open(
        "/vsimem/wfs200_join",
        router.clone(),
        &WfsConfig::default(),
        OpenOptions::new(),
    )
    .unwrap();
    assert!(ds.capabilities().joins_supported);

    let mut result = ds
        .execute_sql("SELECT * FROM lyr1 JOIN lyr2 ON lyr1.str = lyr2.str2")
        .unwrap()
        .unwrap();
    let schema = result.schema();
    assert!(schema.field("lyr1.str").is_some());
    assert!(schema.field("lyr2.str2").is_some());

    let features = drain(result.as_mut());
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].fid, Some(1));
    assert_eq!(features[0].field("lyr1.str"), Some(&FieldValue::from("foo")));
    assert_eq!(features[0].field("lyr2.str2"), Some(&FieldValue::from("foo")));
    assert_eq!(features[0].field("lyr1.gml_id"), Some(&FieldValue::from("lyr1-1")));

    let join_request = router
        .requests()
        .into_iter()
        .rev()
        .find(|request| request.url.contains("REQUEST=GetFeature"))
        .unwrap();
    assert_eq!(
        join_request.url,
        format!(
            "/vsimem/wfs200_join?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=%28lyr1,lyr2%29&FILTER={JOIN_FILTER}"
        )
    );

    for (sql, message) in [
        ("SELECT * FROM lyr1 JOIN lyr2 ON lyr1.str > lyr2.str2", "Unsupported JOIN clause"),
        ("SELECT * FROM lyr1 JOIN lyr3 ON lyr1.str = lyr3.str2", "Unknown layer 'lyr3'"),
        (
            "SELECT ST_Area(lyr1.shape) FROM lyr1 JOIN lyr2 ON lyr1.str = lyr2.str2",
            "Only column names supported in column selection",
        ),
    ] {
        let err = ds.execute_sql(sql).err().unwrap();
        assert!(err.to_string().starts_with(message), "{sql}: {err}");
    }
}

#[test]
fn join_select_distinct_collapses_duplicate_rows() {
    let tuples = [join_tuple(1, "foo", 49), join_tuple(2, "foo", 50), join_tuple(3, "bar", 51)];
    let (router, mut ds) = join_endpoint(collection_200(&tuples));

    let sql = "SELECT DISTINCT lyr1.str, lyr2.str2 FROM lyr1 JOIN lyr2 ON lyr1.str = lyr2.str2";
    let mut result = ds.execute_sql(sql).unwrap().unwrap();
    let features = drain(result.as_mut());
    let values: Vec<_> = features.iter().map(|f| f.field("lyr1.str").cloned()).collect();
    assert_eq!(
        values,
        [Some(FieldValue::from("foo")), Some(FieldValue::from("bar"))]
    );
    assert_eq!(features[1].fid, Some(2));

    // DISTINCT counts by reading, not with a hits request
    assert_eq!(result.feature_count().unwrap(), 2);
    assert!(get_feature_urls(&router).iter().all(|url| !url.contains("RESULTTYPE=hits")));

    let mut all = ds
        .execute_sql("SELECT lyr1.str, lyr2.str2 FROM lyr1 JOIN lyr2 ON lyr1.str = lyr2.str2")
        .unwrap()
        .unwrap();
    assert_eq!(drain(all.as_mut()).len(), 3);
    assert_eq!(all.feature_count().unwrap(), 3);
    let hits = get_feature_urls(&router).pop().unwrap();
    assert_eq!(
        hits,
        format!(
            "/vsimem/wfs200_join?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=%28lyr1,lyr2%29&FILTER={JOIN_FILTER}&RESULTTYPE=hits"
        )
    );
}

#[test]
fn join_order_by_is_sent_as_sortby() {
    let (router, mut ds) = join_endpoint(JOIN_RESULT.to_string());
    let mut result = ds
        .execute_sql("SELECT * FROM lyr1 JOIN lyr2 ON lyr1.str = lyr2.str2 ORDER BY lyr1.str DESC")
        .unwrap()
        .unwrap();
    assert_eq!(drain(result.as_mut()).len(), 1);
    assert_eq!(
        get_feature_urls(&router),
        [format!(
            "/vsimem/wfs200_join?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES=%28lyr1,lyr2%29&FILTER={JOIN_FILTER}&SORTBY=str%20DESC"
        )]
    );
}

#[test]
fn joins_need_server_support() {
    let fetcher = endpoint_110();
    let mut ds = open(fetcher, OpenOptions::new());
    let err = ds
        .execute_sql("SELECT * FROM my_layer JOIN my_layer b ON my_layer.str = b.str")
        .err()
        .unwrap();
    assert!(matches!(err, WfsError::Query(QueryError::JoinsNotSupported)));
}

const INSERT_RESPONSE: &str = "<TransactionResponse><TransactionSummary totalInserted=\"1\"/><InsertResults><Feature><FeatureId fid=\"my_layer.100\"/></Feature></InsertResults></TransactionResponse>";

fn transactional_endpoint() -> Arc<Router> {
    let router = Arc::new(Router::default());
    router.route(&[CAPS_URL], CAPS_110);
    router.route(&[DESCRIBE_URL], MY_LAYER_SCHEMA);
    router.route(&[GET_FEATURE_URL], FEATURES_110);
    router.route(&["&POSTFIELDS=", "<wfs:Insert>"], INSERT_RESPONSE);
    router.route(&["&POSTFIELDS=", "<wfs:Delete"], "<TransactionResponse/>");
    router
}

#[test]
fn inserts_and_deletes() {
    let router = transactional_endpoint();
    let mut read_only = open(router.clone(), OpenOptions::new());
    let mut feature = geowfs_core::Feature::new().with_field("str", "baz");
    let err = read_only.layer(0).unwrap().create_feature(&mut feature).unwrap_err();
    assert!(matches!(err, WfsError::Transaction(TransactionError::NotUpdatable { .. })));

    let mut ds = open(router.clone(), OpenOptions::new().with_update(true));
    let layer = ds.layer(0).unwrap();
    layer.create_feature(&mut feature).unwrap();
    assert_eq!(feature.fid, Some(100));
    assert_eq!(feature.gml_id(), Some("my_layer.100"));
    let post = router.requests().into_iter().find(FetchRequest::is_post).unwrap();
    assert_eq!(post.url, ENDPOINT);
    assert!(post.post_body.unwrap().contains("<feature:str>baz</feature:str>"));

    let mut inserted = ds
        .execute_sql("SELECT _LAST_INSERTED_FIDS_ FROM my_layer")
        .unwrap()
        .unwrap();
    let ids = drain(inserted.as_mut());
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0].field("gml_id"), Some(&FieldValue::from("my_layer.100")));

    assert!(ds.execute_sql("DELETE FROM my_layer WHERE str = 'foo'").unwrap().is_none());
    let delete = router
        .requests()
        .into_iter()
        .filter_map(|request| request.post_body)
        .find(|body| body.contains("<wfs:Delete"))
        .unwrap();
    assert!(delete.contains("PropertyIsEqualTo"), "{delete}");

    ds.layer(0).unwrap().delete_feature(2).unwrap();
}

#[test]
fn queued_transaction() {
    let router = transactional_endpoint();
    let mut ds = open(router.clone(), OpenOptions::new().with_update(true));
    let layer = ds.layer(0).unwrap();

    assert!(layer.commit_transaction().is_err());
    layer.start_transaction().unwrap();
    assert_eq!(layer.transaction_state(), TransactionState::InTransaction);
    let mut feature = geowfs_core::Feature::new().with_field("str", "queued");
    layer.create_feature(&mut feature).unwrap();
    assert!(router.requests().iter().all(|request| !request.is_post()));

    // reads go to the server as it is; the queued insert is not visible yet
    let ids: Vec<_> = drain(layer)
        .iter()
        .filter_map(|f| f.gml_id().map(str::to_string))
        .collect();
    assert_eq!(ids, ["my_layer.1", "my_layer.2"]);
    assert_eq!(layer.transaction_state(), TransactionState::InTransaction);
    assert!(router.requests().iter().all(|request| !request.is_post()));

    layer.commit_transaction().unwrap();
    assert_eq!(layer.transaction_state(), TransactionState::Ready);
    assert_eq!(layer.last_inserted_ids(), ["my_layer.100"]);
    assert_eq!(router.requests().iter().filter(|r| r.is_post()).count(), 1);
}

#[test]
fn delete_statement_errors() {
    let router = transactional_endpoint();
    let mut ds = open(router, OpenOptions::new().with_update(true));
    for (sql, message) in [
        ("DELETE FROM ", "Unsupported SQL statement"),
        ("DELETE FROM non_existing_layer WHERE truc", "Unknown layer"),
        ("DELETE FROM my_layer BLA", "WHERE clause missing"),
        ("DELETE FROM my_layer WHERE -", "SQL Expression Parsing Error"),
    ] {
        let err = ds.execute_sql(sql).err().unwrap();
        assert!(err.to_string().starts_with(message), "{sql}: {err}");
    }
    assert!(ds.execute_sql("DELETE FROM my_layer WHERE ogr_geometry = 'POINT'").is_err());
    assert!(ds.execute_sql("SELECT _LAST_INSERTED_FIDS_ FROM not_existing_layer").is_err());
}

#[test]
fn single_layer_select_pushes_clauses() {
    let router = transactional_endpoint();
    let mut ds = open(router.clone(), OpenOptions::new());
    let mut result = ds
        .execute_sql("SELECT str FROM my_layer WHERE str = 'foo' ORDER BY str DESC")
        .unwrap()
        .unwrap();
    assert!(result.next_feature().unwrap().is_some());
    let url = router.requests().last().unwrap().url.clone();
    assert!(url.contains("&FILTER="), "{url}");
    assert!(url.contains("&PROPERTYNAME=str&"), "{url}");
    assert!(url.contains("&SORTBY=str%20DESC"), "{url}");
}

#[test]
fn description_file_caches_capabilities_and_schemas() {
    let file = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
    std::fs::write(
        file.path(),
        format!("<OGRWFSDataSource>\n  <URL>{ENDPOINT}</URL>\n</OGRWFSDataSource>\n"),
    )
    .unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let fetcher = endpoint_110();
    let mut ds = WfsDataSource::open(&path, fetcher.clone(), &WfsConfig::default(), OpenOptions::new())
        .unwrap();
    assert_eq!(ds.layer(0).unwrap().schema().field_count(), 8);
    let content = std::fs::read_to_string(file.path()).unwrap();
    assert!(content.contains("<WFS_Capabilities"));
    assert!(content.contains("<OGRWFSLayer name=\"my_layer\">"));

    // everything needed is now on disk
    let offline = Arc::new(MemoryFetcher::new());
    offline.insert(GET_FEATURE_URL, FEATURES_110);
    let mut ds = WfsDataSource::open(&path, offline.clone(), &WfsConfig::default(), OpenOptions::new())
        .unwrap();
    let layer = ds.layer(0).unwrap();
    assert_eq!(layer.schema().field_count(), 8);
    assert_eq!(drain(layer).len(), 2);
    assert_eq!(offline.requested_urls(), [GET_FEATURE_URL]);
}

#[test]
fn extent_from_whole_world_bounds() {
    let mut ds = open(endpoint_110(), OpenOptions::new());
    let extent = ds.layer(0).unwrap().extent().unwrap();
    assert_eq!((extent.min_x, extent.min_y, extent.max_x, extent.max_y), (-180.0, -90.0, 180.0, 90.0));
}
