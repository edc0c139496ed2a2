//! XML description files caching an endpoint's capabilities and layer schemas.
//!
//! A description file has an `OGRWFSDataSource` root holding the endpoint `URL`, the
//! `WFS_Capabilities` document once fetched, and one `OGRWFSLayer` per described layer. The
//! datasource fills it in as it learns about the endpoint, so a later open issues no
//! `GetCapabilities` and no `DescribeFeatureType` request for layers already recorded.
//!
//! A bare capabilities document saved to disk is accepted as well, read-only.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Result, WfsError};
use crate::xml::{XmlElement, XmlNode, parse_document, to_pretty_string};

pub const DATASOURCE_ROOT: &str = "OGRWFSDataSource";
const LAYER_ELEMENT: &str = "OGRWFSLayer";
const CAPABILITIES_ROOT: &str = "WFS_Capabilities";

/// A loaded description file.
#[derive(Debug, Clone)]
pub struct DescriptionFile {
    path: PathBuf,
    root: XmlElement,
}

fn io_error(path: &Path, source: std::io::Error) -> WfsError {
    WfsError::DescriptionFile {
        path: path.display().to_string(),
        source,
    }
}

impl DescriptionFile {
    /// Whether `connection` names a local file that looks like a description or capabilities
    /// document.
    #[must_use]
    pub fn detect(connection: &str) -> bool {
        let path = Path::new(connection);
        if !path.is_file() {
            return false;
        }
        fs::read(path).is_ok_and(|bytes| {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).into_owned();
            head.contains(DATASOURCE_ROOT) || head.contains(CAPABILITIES_ROOT)
        })
    }

    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError::DescriptionFile`] when the file cannot be read, and a response
    /// error when it is not well-formed XML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
        let root = parse_document(&bytes)?;
        debug!("loaded description file {} (root {})", path.display(), root.local_name());
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the datasource may record what it learns in this file.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.root.local_name() == DATASOURCE_ROOT
    }

    /// Endpoint URL recorded in the file.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.root
            .child_text("URL")
            .filter(|url| !url.is_empty())
    }

    /// The recorded capabilities document.
    #[must_use]
    pub fn capabilities(&self) -> Option<&XmlElement> {
        if self.root.local_name() == CAPABILITIES_ROOT {
            return Some(&self.root);
        }
        self.root.child(CAPABILITIES_ROOT)
    }

    /// Records the capabilities document, replacing a previous one.
    pub fn set_capabilities(&mut self, capabilities: &XmlElement) {
        if !self.is_writable() {
            return;
        }
        self.root
            .children
            .retain(|node| !matches!(node, XmlNode::Element(e) if e.local_name() == CAPABILITIES_ROOT));
        let position = self
            .root
            .children
            .iter()
            .position(|node| matches!(node, XmlNode::Element(e) if e.local_name() == "URL"))
            .map_or(0, |idx| idx + 1);
        self.root
            .children
            .insert(position, XmlNode::Element(capabilities.clone()));
    }

    /// Schema root recorded for `layer`.
    #[must_use]
    pub fn layer_schema(&self, layer: &str) -> Option<&XmlElement> {
        self.root
            .children_named(LAYER_ELEMENT)
            .find(|element| element.attr("name") == Some(layer))
            .and_then(|element| element.elements().next())
    }

    /// Names of the layers with a recorded schema.
    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.root
            .children_named(LAYER_ELEMENT)
            .filter_map(|element| element.attr("name"))
    }

    /// Records the schema root of `layer`. A layer already present keeps its first schema.
    pub fn add_layer(&mut self, layer: &str, schema: &XmlElement) {
        if !self.is_writable() || self.layer_schema(layer).is_some() {
            return;
        }
        self.root.children.push(XmlNode::Element(
            XmlElement::new(LAYER_ELEMENT)
                .with_attr("name", layer)
                .with_child(schema.clone()),
        ));
    }

    /// Serialized file content.
    #[must_use]
    pub fn to_xml(&self) -> String {
        to_pretty_string(&self.root)
    }

    /// Writes the file back to disk.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError::DescriptionFile`] when the file cannot be written.
    pub fn save(&self) -> Result<()> {
        if !self.is_writable() {
            return Ok(());
        }
        fs::write(&self.path, self.to_xml()).map_err(|source| io_error(&self.path, source))?;
        info!("updated description file {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn file_with(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn fills_in_capabilities_then_layers() {
        let file = file_with("<OGRWFSDataSource>\n    <URL>/vsimem/wfs_endpoint</URL>\n</OGRWFSDataSource>");
        assert!(DescriptionFile::detect(file.path().to_str().unwrap()));

        let mut description = DescriptionFile::load(file.path()).unwrap();
        assert!(description.is_writable());
        assert_eq!(description.url().as_deref(), Some("/vsimem/wfs_endpoint"));
        assert!(description.capabilities().is_none());

        let capabilities = parse_document(
            b"<WFS_Capabilities version=\"1.1.0\"><FeatureTypeList><FeatureType/><FeatureType><Name>my_layer</Name></FeatureType></FeatureTypeList></WFS_Capabilities>",
        )
        .unwrap();
        description.set_capabilities(&capabilities);
        description.save().unwrap();
        assert_eq!(
            fs::read_to_string(file.path()).unwrap(),
            "<OGRWFSDataSource>\n  <URL>/vsimem/wfs_endpoint</URL>\n  <WFS_Capabilities version=\"1.1.0\">\n    <FeatureTypeList>\n      <FeatureType />\n      <FeatureType>\n        <Name>my_layer</Name>\n      </FeatureType>\n    </FeatureTypeList>\n  </WFS_Capabilities>\n</OGRWFSDataSource>\n"
        );

        let mut reloaded = DescriptionFile::load(file.path()).unwrap();
        assert_eq!(reloaded.capabilities(), Some(&capabilities));

        let schema = parse_document(b"<xsd:schema xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\"><xsd:element name=\"my_layer\"/></xsd:schema>").unwrap();
        reloaded.add_layer("my_layer", &schema);
        reloaded.add_layer("my_layer", &XmlElement::new("other"));
        reloaded.save().unwrap();
        let content = fs::read_to_string(file.path()).unwrap();
        assert!(content.ends_with(
            "  <OGRWFSLayer name=\"my_layer\">\n    <xsd:schema xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\">\n      <xsd:element name=\"my_layer\" />\n    </xsd:schema>\n  </OGRWFSLayer>\n</OGRWFSDataSource>\n"
        ));

        // writing what was read yields the same bytes
        let again = DescriptionFile::load(file.path()).unwrap();
        assert_eq!(again.to_xml(), content);
        assert_eq!(again.layer_schema("my_layer"), Some(&schema));
        assert_eq!(again.layer_names().collect::<Vec<_>>(), ["my_layer"]);
    }

    #[test]
    fn bare_capabilities_are_read_only() {
        let file = file_with("<WFS_Capabilities version=\"1.0.0\"><FeatureTypeList/></WFS_Capabilities>");
        let mut description = DescriptionFile::load(file.path()).unwrap();
        assert!(!description.is_writable());
        assert_eq!(description.capabilities().unwrap().attr("version"), Some("1.0.0"));
        description.add_layer("x", &XmlElement::new("schema"));
        assert!(description.layer_schema("x").is_none());
    }

    #[test]
    fn unrelated_files_are_not_detected() {
        let file = file_with("<gml:FeatureCollection/>");
        assert!(!DescriptionFile::detect(file.path().to_str().unwrap()));
        assert!(!DescriptionFile::detect("/nonexistent/description.xml"));
        let err = DescriptionFile::load("/nonexistent/description.xml").unwrap_err();
        assert!(err.to_string().starts_with("Cannot access description file"));
    }
}
