use std::io::Write as _;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const DESCRIPTION: &str = r#"<OGRWFSDataSource>
  <URL>http://127.0.0.1:9/wfs</URL>
  <WFS_Capabilities version="1.1.0" xmlns:ows="http://www.opengis.net/ows">
    <ows:ServiceIdentification><ows:Title>Offline service</ows:Title></ows:ServiceIdentification>
    <FeatureTypeList>
      <FeatureType>
        <Name>foo:my_layer</Name>
        <Title>My layer</Title>
        <DefaultSRS>urn:ogc:def:crs:EPSG::4326</DefaultSRS>
      </FeatureType>
    </FeatureTypeList>
  </WFS_Capabilities>
  <OGRWFSLayer name="foo:my_layer">
    <xsd:schema xmlns:foo="http://foo" xmlns:gml="http://www.opengis.net/gml" xmlns:xsd="http://www.w3.org/2001/XMLSchema" targetNamespace="http://foo">
      <xsd:complexType name="my_layerType">
        <xsd:complexContent>
          <xsd:extension base="gml:AbstractFeatureType">
            <xsd:sequence>
              <xsd:element name="population" nillable="true" type="xsd:int"/>
              <xsd:element name="label" type="xsd:string"/>
              <xsd:element name="shape" type="gml:PolygonPropertyType"/>
            </xsd:sequence>
          </xsd:extension>
        </xsd:complexContent>
      </xsd:complexType>
      <xsd:element name="my_layer" type="foo:my_layerType"/>
    </xsd:schema>
  </OGRWFSLayer>
</OGRWFSDataSource>
"#;

fn description_file() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
    file.write_all(DESCRIPTION.as_bytes()).unwrap();
    file
}

fn geowfs() -> Command {
    Command::cargo_bin("geowfs").unwrap()
}

#[test]
fn test_help() {
    geowfs()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("layers"))
        .stdout(predicate::str::contains("versions"));
}

#[test]
fn test_version_flag() {
    geowfs()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("geowfs "));
}

#[test]
fn test_versions_table() {
    geowfs()
        .arg("versions")
        .assert()
        .success()
        .stdout(predicate::str::contains("Supported WFS versions"))
        .stdout(predicate::str::contains("2.0.0"))
        .stdout(predicate::str::contains("FES 2.0"));
}

#[test]
fn test_missing_arguments() {
    geowfs().arg("schema").assert().failure();
    geowfs().args(["query", "http://127.0.0.1:9/wfs"]).assert().failure();
}

#[test]
fn test_invalid_open_option() {
    let file = description_file();
    geowfs()
        .args(["layers", file.path().to_str().unwrap(), "--oo", "NOT_A_PAIR"])
        .assert()
        .failure();
}

#[test]
fn test_info_from_description_file() {
    let file = description_file();
    geowfs()
        .args(["info", file.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Version: 1.1.0"))
        .stdout(predicate::str::contains("Title: Offline service"))
        .stdout(predicate::str::contains("Layers: 1"));
}

#[test]
fn test_layers_from_description_file() {
    let file = description_file();
    geowfs()
        .args(["layers", file.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("foo:my_layer"))
        .stdout(predicate::str::contains("My layer"))
        .stdout(predicate::str::contains("urn:ogc:def:crs:EPSG::4326"));
}

#[test]
fn test_schema_from_description_file() {
    let file = description_file();
    geowfs()
        .args(["schema", file.path().to_str().unwrap(), "my_layer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Layer: foo:my_layer"))
        .stdout(predicate::str::contains("Geometry: shape (Polygon)"))
        .stdout(predicate::str::contains("population"))
        .stdout(predicate::str::contains("label"));
}

#[test]
fn test_schema_of_unknown_layer() {
    let file = description_file();
    geowfs()
        .args(["schema", file.path().to_str().unwrap(), "other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Layer 'other' not found."));
}
