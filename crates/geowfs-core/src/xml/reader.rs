//! Event-level reading with `quick-xml`.

use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{XmlElement, XmlNode, local_name};
use crate::error::ResponseError;

const UNCLOSED_AT_EOF: &str = "Parse error at EOF, not all elements have been closed";

/// A well-formedness failure reported by the pull parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSyntaxError {
    pub detail: String,
}

impl XmlSyntaxError {
    /// Converts into an `InvalidXml` response error echoing `body`.
    #[must_use]
    pub fn into_response_error(self, body: &[u8]) -> ResponseError {
        ResponseError::InvalidXml {
            detail: self.detail,
            content: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// An opening tag with its decoded attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

impl StartTag {
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

    fn into_element(self) -> XmlElement {
        XmlElement {
            name: self.name,
            attributes: self.attributes,
            children: Vec::new(),
        }
    }
}

/// Simplified document events. Empty elements are reported as a start followed by an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullEvent {
    Start(StartTag),
    End(String),
    Text(String),
    Eof,
}

/// Pull parser tracking element depth.
pub struct XmlPullParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    depth: usize,
    pending_end: Option<String>,
}

impl<R: BufRead> XmlPullParser<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            depth: 0,
            pending_end: None,
        }
    }

    /// Number of currently open elements.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Reads the next significant event.
    ///
    /// # Errors
    ///
    /// Returns an [`XmlSyntaxError`] when the document is not well-formed, including when it
    /// ends with unclosed elements.
    pub fn next_event(&mut self) -> Result<PullEvent, XmlSyntaxError> {
        if let Some(name) = self.pending_end.take() {
            self.depth = self.depth.saturating_sub(1);
            return Ok(PullEvent::End(name));
        }
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(err) => return Err(self.syntax_error(&err.to_string())),
            };
            match event {
                Event::Start(start) => {
                    let tag = decode_start(&start)?;
                    self.depth += 1;
                    return Ok(PullEvent::Start(tag));
                },
                Event::Empty(start) => {
                    let tag = decode_start(&start)?;
                    self.depth += 1;
                    self.pending_end = Some(tag.name.clone());
                    return Ok(PullEvent::Start(tag));
                },
                Event::End(end) => {
                    self.depth = self.depth.saturating_sub(1);
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    return Ok(PullEvent::End(name));
                },
                Event::Text(text) => {
                    let text = text.unescape().map_err(|err| XmlSyntaxError {
                        detail: err.to_string(),
                    })?;
                    if !text.is_empty() {
                        return Ok(PullEvent::Text(text.into_owned()));
                    }
                },
                Event::CData(cdata) => {
                    let text = String::from_utf8_lossy(cdata.as_ref()).into_owned();
                    return Ok(PullEvent::Text(text));
                },
                Event::Eof => {
                    if self.depth > 0 {
                        return Err(XmlSyntaxError {
                            detail: UNCLOSED_AT_EOF.to_string(),
                        });
                    }
                    return Ok(PullEvent::Eof);
                },
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {},
            }
        }
    }

    /// Reads the rest of an element whose start tag was just returned into a tree.
    ///
    /// # Errors
    ///
    /// Returns an [`XmlSyntaxError`] when the element is not well-formed.
    pub fn read_subtree(&mut self, start: StartTag) -> Result<XmlElement, XmlSyntaxError> {
        let mut stack = vec![start.into_element()];
        loop {
            match self.next_event()? {
                PullEvent::Start(tag) => stack.push(tag.into_element()),
                PullEvent::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.children.push(XmlNode::Text(text));
                    }
                },
                PullEvent::End(_) => {
                    let Some(done) = stack.pop() else {
                        return Err(self.syntax_error("unbalanced end tag"));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(done)),
                        None => return Ok(done),
                    }
                },
                PullEvent::Eof => {
                    return Err(XmlSyntaxError {
                        detail: UNCLOSED_AT_EOF.to_string(),
                    });
                },
            }
        }
    }

    /// Skips the rest of an element whose start tag was just returned.
    ///
    /// # Errors
    ///
    /// Returns an [`XmlSyntaxError`] when the element is not well-formed.
    pub fn skip_subtree(&mut self) -> Result<(), XmlSyntaxError> {
        let target = self.depth.saturating_sub(1);
        while self.depth > target {
            if self.next_event()? == PullEvent::Eof {
                break;
            }
        }
        Ok(())
    }

    fn syntax_error(&self, message: &str) -> XmlSyntaxError {
        let position = self.reader.buffer_position() as usize;
        // unterminated markup at the end of input
        if message.contains("end of input") || message.contains("EOF") {
            XmlSyntaxError {
                detail: UNCLOSED_AT_EOF.to_string(),
            }
        } else {
            XmlSyntaxError {
                detail: format!("{message} at byte {position}"),
            }
        }
    }
}

fn decode_start(start: &BytesStart<'_>) -> Result<StartTag, XmlSyntaxError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    // some servers repeat namespace declarations on the schema root
    let mut raw_attributes = start.attributes();
    raw_attributes.with_checks(false);
    for attribute in raw_attributes {
        let attribute = attribute.map_err(|err| XmlSyntaxError {
            detail: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| XmlSyntaxError {
                detail: err.to_string(),
            })?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(StartTag { name, attributes })
}

/// Parses a whole document into its root element.
///
/// # Errors
///
/// Returns [`ResponseError::EmptyResponse`] for an empty body and
/// [`ResponseError::InvalidXml`] when the body is not a well-formed document.
pub fn parse_document(body: &[u8]) -> Result<XmlElement, ResponseError> {
    if body.is_empty() {
        return Err(ResponseError::EmptyResponse);
    }
    let mut parser = XmlPullParser::new(body);
    let mut root = None;
    loop {
        match parser.next_event() {
            Ok(PullEvent::Start(tag)) if root.is_none() => {
                root = Some(
                    parser
                        .read_subtree(tag)
                        .map_err(|err| err.into_response_error(body))?,
                );
            },
            Ok(PullEvent::Start(_) | PullEvent::End(_)) => {
                return Err(XmlSyntaxError {
                    detail: "junk after document element".to_string(),
                }
                .into_response_error(body));
            },
            Ok(PullEvent::Text(_)) => {},
            Ok(PullEvent::Eof) => break,
            Err(err) => return Err(err.into_response_error(body)),
        }
    }
    root.ok_or_else(|| {
        XmlSyntaxError {
            detail: "no root element".to_string(),
        }
        .into_response_error(body)
    })
}
