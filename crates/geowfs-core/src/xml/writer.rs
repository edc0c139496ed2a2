//! Serialization of [`XmlElement`] trees and escaping helpers.
//!
//! The pretty form is the one used for description files: two spaces per level, `<tag />` for
//! empty elements, text-only elements on one line and a trailing newline. Reading the output
//! back and writing it again yields the same bytes.

use std::borrow::Cow;
use std::fmt::Write as _;

use quick_xml::escape::partial_escape;

use super::{XmlElement, XmlNode};

/// Escapes `<`, `>` and `&` in text content.
#[must_use]
pub fn escape_text(text: &str) -> Cow<'_, str> {
    partial_escape(text)
}

/// Escapes text for use inside a double-quoted attribute value.
#[must_use]
pub fn escape_attr(value: &str) -> String {
    partial_escape(value).replace('"', "&quot;")
}

/// Serializes `element` with two-space indentation and a trailing newline.
#[must_use]
pub fn to_pretty_string(element: &XmlElement) -> String {
    let mut out = String::new();
    write_element(element, 0, &mut out);
    out
}

fn write_element(element: &XmlElement, level: usize, out: &mut String) {
    let indent = "  ".repeat(level);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        let _ = write!(out, " {key}=\"{}\"", escape_attr(value));
    }

    let has_elements = element.elements().next().is_some();
    if element.children.is_empty() {
        out.push_str(" />\n");
    } else if !has_elements {
        out.push('>');
        out.push_str(&escape_text(&element.text()));
        let _ = writeln!(out, "</{}>", element.name);
    } else {
        out.push_str(">\n");
        for child in &element.children {
            match child {
                XmlNode::Element(child) => write_element(child, level + 1, out),
                XmlNode::Text(text) => {
                    let _ = writeln!(out, "{indent}  {}", escape_text(text));
                },
            }
        }
        let _ = writeln!(out, "{indent}</{}>", element.name);
    }
}
