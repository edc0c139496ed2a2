//! Event-driven GML decoding.

use std::io::Cursor;

use bytes::Bytes;

use super::{
    DecodedRecord, ResponseCounts, ResponseDecoder, check_collection_root, counts_from,
    feature_from_element, is_collection_metadata, is_member_container, tuple_from_element,
};
use crate::error::{ResponseError, Result, WfsError};
use crate::xml::{PullEvent, XmlPullParser, XmlSyntaxError};

/// Pulls features out of a GML body one element at a time.
///
/// Only the feature being returned is held as a tree; everything else is consumed as events.
pub struct StreamingGmlDecoder {
    parser: XmlPullParser<Cursor<Bytes>>,
    body: Bytes,
    counts: ResponseCounts,
    lat_long_order: bool,
    finished: bool,
}

impl StreamingGmlDecoder {
    /// Reads up to the collection root.
    ///
    /// # Errors
    ///
    /// Fails with [`ResponseError::ServerException`] for exception reports and
    /// [`ResponseError::MissingFeatureCollection`] for any other root.
    pub fn new(body: Bytes, lat_long_order: bool) -> Result<Self> {
        if body.is_empty() {
            return Err(ResponseError::EmptyResponse.into());
        }
        let mut parser = XmlPullParser::new(Cursor::new(body.clone()));
        let root = loop {
            match parser.next_event() {
                Ok(PullEvent::Start(tag)) => break tag,
                Ok(PullEvent::Text(_) | PullEvent::End(_)) => {},
                Ok(PullEvent::Eof) => return Err(ResponseError::MissingFeatureCollection.into()),
                Err(err) => return Err(err.into_response_error(&body).into()),
            }
        };
        check_collection_root(root.local_name(), &body)?;
        let counts = counts_from(|name| root.attr(name).map(str::to_string));
        Ok(Self {
            parser,
            body,
            counts,
            lat_long_order,
            finished: false,
        })
    }

    fn syntax(&self, err: XmlSyntaxError) -> WfsError {
        err.into_response_error(&self.body).into()
    }
}

impl ResponseDecoder for StreamingGmlDecoder {
    fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let event = self.parser.next_event().map_err(|err| self.syntax(err))?;
            match event {
                PullEvent::Start(tag) => {
                    let local = tag.local_name();
                    if is_member_container(local) {
                        continue;
                    }
                    if is_collection_metadata(local) {
                        self.parser.skip_subtree().map_err(|err| self.syntax(err))?;
                        continue;
                    }
                    let is_tuple = local == "Tuple";
                    let element = self
                        .parser
                        .read_subtree(tag)
                        .map_err(|err| self.syntax(err))?;
                    let record = if is_tuple {
                        tuple_from_element(&element, self.lat_long_order)?
                    } else {
                        DecodedRecord::Feature(feature_from_element(
                            &element,
                            self.lat_long_order,
                        )?)
                    };
                    return Ok(Some(record));
                },
                PullEvent::End(_) | PullEvent::Text(_) => {},
                PullEvent::Eof => {
                    self.finished = true;
                    return Ok(None);
                },
            }
        }
    }

    fn counts(&self) -> ResponseCounts {
        self.counts
    }
}
