//! `GeoJSON` parsing helpers turning a feature collection into raw WFS features.

use std::convert::TryInto;

use geo_types::Geometry;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry as GeoJsonGeometry, JsonObject, JsonValue};
use wfs_shared::{
    FeatureFormatError, FeatureFormatResult, RawCollection, RawFeature, RawValue, SourcePosition,
    parse_count,
};

/// Parse a response body into a [`RawCollection`].
///
/// # Errors
///
/// Returns [`FeatureFormatError::Syntax`] when the body is not valid JSON or not valid
/// `GeoJSON`, [`FeatureFormatError::NotACollection`] when the top-level object is a bare
/// feature or geometry, and [`FeatureFormatError::Geometry`] when a feature geometry cannot be
/// converted.
pub fn parse_feature_collection(
    bytes: &[u8],
    context: impl Into<String>,
) -> FeatureFormatResult<RawCollection> {
    let context = context.into();
    let reader = std::io::Cursor::new(bytes);

    let geojson = GeoJson::from_reader(reader).map_err(|err| FeatureFormatError::Syntax {
        message: err.to_string(),
        position: None,
        context: Some(context.clone()),
    })?;

    match geojson {
        GeoJson::FeatureCollection(collection) => collection_to_raw(collection),
        GeoJson::Feature(_) => Err(FeatureFormatError::NotACollection {
            found: "Feature".to_string(),
            context: Some(context),
        }),
        GeoJson::Geometry(_) => Err(FeatureFormatError::NotACollection {
            found: "Geometry".to_string(),
            context: Some(context),
        }),
    }
}

fn collection_to_raw(collection: FeatureCollection) -> FeatureFormatResult<RawCollection> {
    let members = collection.foreign_members.unwrap_or_default();
    let number_matched = counter(&members, "numberMatched").or_else(|| counter(&members, "totalFeatures"));
    let number_returned = counter(&members, "numberReturned");

    let features = collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| feature_to_raw(feature, index))
        .collect::<FeatureFormatResult<Vec<_>>>()?;

    Ok(RawCollection {
        features,
        number_matched,
        number_returned,
    })
}

fn counter(members: &JsonObject, key: &str) -> Option<u64> {
    match members.get(key)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => parse_count(s),
        _ => None,
    }
}

fn feature_to_raw(feature: Feature, index: usize) -> FeatureFormatResult<RawFeature> {
    let geometry = match feature.geometry {
        Some(geometry) => Some(convert_geometry(geometry, index)?),
        None => None,
    };

    let id = feature.id.map(|id| match id {
        geojson::feature::Id::String(s) => s,
        geojson::feature::Id::Number(n) => n.to_string(),
    });

    let properties = feature
        .properties
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, json_to_raw(value)))
        .collect();

    Ok(RawFeature {
        id,
        properties,
        geometry,
    })
}

fn convert_geometry(geometry: GeoJsonGeometry, index: usize) -> FeatureFormatResult<Geometry<f64>> {
    geometry
        .try_into()
        .map_err(|err| FeatureFormatError::Geometry {
            message: format!("Failed to convert GeoJSON geometry: {err}"),
            position: Some(SourcePosition {
                record: Some(index as u64 + 1),
                ..SourcePosition::default()
            }),
        })
}

fn json_to_raw(value: JsonValue) -> RawValue {
    match value {
        JsonValue::Null => RawValue::Null,
        JsonValue::Bool(b) => RawValue::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => RawValue::Integer(i),
            None => n.as_f64().map_or(RawValue::Null, RawValue::Real),
        },
        JsonValue::String(s) => RawValue::Text(s),
        other @ (JsonValue::Array(_) | JsonValue::Object(_)) => RawValue::Text(other.to_string()),
    }
}
