//! Minimal XML plumbing over `quick-xml`.
//!
//! Capabilities, schemas and transaction responses are small and read into an [`XmlElement`]
//! tree. Feature collections can be large and go through the [`XmlPullParser`] instead, which
//! only builds trees for one feature member at a time. Names are kept qualified as they appear
//! in the document; lookups match on local names so that prefixed and unprefixed documents
//! behave the same.

pub mod reader;
pub mod writer;

use std::collections::BTreeMap;

pub use reader::{PullEvent, StartTag, XmlPullParser, XmlSyntaxError, parse_document};
pub use writer::{escape_attr, escape_text, to_pretty_string};

/// Returns the part of a qualified name after the prefix.
#[must_use]
pub fn local_name(qname: &str) -> &str {
    qname.rsplit_once(':').map_or(qname, |(_, local)| local)
}

/// Returns the prefix of a qualified name, if any.
#[must_use]
pub fn prefix(qname: &str) -> Option<&str> {
    qname.split_once(':').map(|(prefix, _)| prefix)
}

/// A node of an [`XmlElement`] tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An element with its attributes and children, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name.
    pub name: String,
    /// Attributes in document order, namespace declarations included.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    #[must_use]
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    /// Looks an attribute up by qualified name, then by local name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(key, _)| !key.starts_with("xmlns") && local_name(key) == name)
            })
            .map(|(_, value)| value.as_str())
    }

    /// Child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Child elements with the given local name.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.elements().filter(move |e| e.local_name() == local)
    }

    /// First child element with the given local name.
    #[must_use]
    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.local_name() == local)
    }

    /// Follows a path of local names.
    #[must_use]
    pub fn path(&self, locals: &[&str]) -> Option<&XmlElement> {
        locals
            .iter()
            .try_fold(self, |element, local| element.child(local))
    }

    /// Concatenated direct text content.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Trimmed text of the first child with the given local name.
    #[must_use]
    pub fn child_text(&self, local: &str) -> Option<String> {
        self.child(local).map(|c| c.text().trim().to_string())
    }

    /// Depth-first search for a descendant (or self) with the given local name.
    #[must_use]
    pub fn find(&self, local: &str) -> Option<&XmlElement> {
        if self.local_name() == local {
            return Some(self);
        }
        self.elements().find_map(|child| child.find(local))
    }

    /// All `xmlns:prefix` declarations of this subtree, first declaration wins.
    #[must_use]
    pub fn namespace_declarations(&self) -> BTreeMap<String, String> {
        let mut declarations = BTreeMap::new();
        self.collect_declarations(&mut declarations);
        declarations
    }

    fn collect_declarations(&self, declarations: &mut BTreeMap<String, String>) {
        for (key, value) in &self.attributes {
            if let Some(prefix) = key.strip_prefix("xmlns:") {
                declarations
                    .entry(prefix.to_string())
                    .or_insert_with(|| value.clone());
            }
        }
        for child in self.elements() {
            child.collect_declarations(declarations);
        }
    }

    /// Whether the element has neither text nor element children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.iter().all(|node| match node {
            XmlNode::Text(text) => text.trim().is_empty(),
            XmlNode::Element(_) => false,
        })
    }
}
