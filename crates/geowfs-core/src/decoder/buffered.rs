//! Whole-document GML decoding.

use std::collections::VecDeque;

use super::{
    DecodedRecord, ResponseCounts, ResponseDecoder, check_collection_root, counts_from,
    feature_from_element, is_collection_metadata, is_member_container, tuple_from_element,
};
use crate::error::Result;
use crate::xml::{XmlElement, parse_document};

/// Decodes the whole body up front and hands records out from memory.
#[derive(Debug)]
pub struct BufferedGmlDecoder {
    records: VecDeque<DecodedRecord>,
    counts: ResponseCounts,
}

impl BufferedGmlDecoder {
    /// Parses `body` and decodes every feature it holds.
    ///
    /// # Errors
    ///
    /// Returns the document-level response errors and any feature decoding failure.
    pub fn new(body: &[u8], lat_long_order: bool) -> Result<Self> {
        let root = parse_document(body)?;
        check_collection_root(root.local_name(), body)?;
        let counts = counts_from(|name| root.attr(name).map(str::to_string));
        let mut records = VecDeque::new();
        collect(&root, lat_long_order, &mut records)?;
        Ok(Self { records, counts })
    }

    /// Number of records not yet returned.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

fn collect(
    container: &XmlElement,
    lat_long_order: bool,
    out: &mut VecDeque<DecodedRecord>,
) -> Result<()> {
    for child in container.elements() {
        let local = child.local_name();
        if is_member_container(local) {
            collect(child, lat_long_order, out)?;
        } else if is_collection_metadata(local) {
            continue;
        } else if local == "Tuple" {
            out.push_back(tuple_from_element(child, lat_long_order)?);
        } else {
            out.push_back(DecodedRecord::Feature(feature_from_element(
                child,
                lat_long_order,
            )?));
        }
    }
    Ok(())
}

impl ResponseDecoder for BufferedGmlDecoder {
    fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        Ok(self.records.pop_front())
    }

    fn counts(&self) -> ResponseCounts {
        self.counts
    }
}
