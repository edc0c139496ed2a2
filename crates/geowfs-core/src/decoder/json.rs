//! Decoders for payloads parsed by the format crates.

use std::collections::VecDeque;

use wfs_shared::{RawCollection, RawFeature};

use super::{DecodeOptions, DecodedFeature, DecodedRecord, ResponseCounts, ResponseDecoder};
use crate::error::{ResponseError, Result};
use crate::geometry::swap_axes;

/// Serves records from an already decoded [`RawCollection`].
#[derive(Debug, Default)]
pub struct CollectionDecoder {
    records: VecDeque<DecodedRecord>,
    counts: ResponseCounts,
}

impl CollectionDecoder {
    /// Wraps decoded collections, concatenated in order.
    ///
    /// Geometries are swapped when the layer SRS has lat/long order, even though these
    /// formats are `x y` by definition. Callers rely on that orientation.
    #[must_use]
    pub fn from_collections(collections: Vec<RawCollection>, options: &DecodeOptions) -> Self {
        let mut counts = ResponseCounts::default();
        let mut records = VecDeque::new();
        for collection in collections {
            counts.number_matched = counts.number_matched.or(collection.number_matched);
            counts.number_returned = counts.number_returned.or(collection.number_returned);
            records.extend(
                collection
                    .features
                    .into_iter()
                    .map(|raw| DecodedRecord::Feature(decoded(raw, options))),
            );
        }
        Self { records, counts }
    }

    /// Parses a `GeoJSON` body.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidJson`] when the body is not a feature collection.
    pub fn from_json(body: &[u8], options: &DecodeOptions) -> Result<Self> {
        let collection = wfs_geojson::parse_feature_collection(body, "GetFeature response")
            .map_err(|source| ResponseError::InvalidJson { source })?;
        Ok(Self::from_collections(vec![collection], options))
    }
}

fn decoded(raw: RawFeature, options: &DecodeOptions) -> DecodedFeature {
    let geometries = raw
        .geometry
        .map(|mut geometry| {
            if options.lat_long_order {
                swap_axes(&mut geometry);
            }
            vec![(String::new(), geometry)]
        })
        .unwrap_or_default();
    DecodedFeature {
        type_name: options.type_name.clone(),
        id: raw.id,
        properties: raw.properties,
        geometries,
    }
}

impl ResponseDecoder for CollectionDecoder {
    fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        Ok(self.records.pop_front())
    }

    fn counts(&self) -> ResponseCounts {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{Geometry, Point};
    use wfs_shared::RawValue;

    const COLLECTION: &str = r#"{"type":"FeatureCollection","totalFeatures":"unknown","numberReturned":1,
"features":[{"type":"Feature","id":"my_layer.1","geometry":{"type":"Point","coordinates":[2,49]},"properties":{"str":"str"}}]}"#;

    #[test]
    fn geojson_is_swapped_for_lat_long_layers() {
        let options = DecodeOptions {
            streaming: true,
            lat_long_order: true,
            type_name: "my_layer".into(),
        };
        let mut decoder = CollectionDecoder::from_json(COLLECTION.as_bytes(), &options).unwrap();
        assert_eq!(decoder.counts().number_matched, None);
        assert_eq!(decoder.counts().number_returned, Some(1));
        let feature = decoder.next_record().unwrap().unwrap().into_feature().unwrap();
        assert_eq!(feature.type_name, "my_layer");
        assert_eq!(feature.property("str"), Some(&RawValue::Text("str".into())));
        assert_eq!(feature.geometries[0].1, Geometry::Point(Point::new(49.0, 2.0)));
    }

    #[test]
    fn invalid_json() {
        let err = CollectionDecoder::from_json(b"{ invalid", &DecodeOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON content"), "{err}");
        let err = CollectionDecoder::from_json(br#"{"type":"Point","coordinates":[1,2]}"#, &DecodeOptions::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON content"));
    }
}
