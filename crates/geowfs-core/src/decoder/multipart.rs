//! `multipart/mixed` bodies returned for `OUTPUTFORMAT=multipart`.
//!
//! Each part is a file. `GeoJSON` parts (a `.json` name, or content starting with `{`) and
//! `.csv` parts, typed by a `.csvt` companion when present, are decoded. Other parts are
//! ignored.

use log::{debug, warn};
use wfs_csv::{CsvPartOptions, parse_csv_part};
use wfs_shared::RawCollection;

use super::{CollectionDecoder, DecodeOptions};
use crate::error::{ResponseError, Result};

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub headers: Vec<(String, String)>,
    pub content: &'a [u8],
}

impl Part<'_> {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `filename` parameter of `Content-Disposition`.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.header("Content-Disposition")
            .and_then(|value| header_parameter(value, "filename"))
    }
}

fn header_parameter<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    value.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Boundary declared by the content type header, or by a `Content-Type:` line heading the body.
#[must_use]
pub fn boundary(body: &[u8], content_type: Option<&str>) -> Option<String> {
    let declared = content_type
        .filter(|ct| ct.to_ascii_lowercase().starts_with("multipart/"))
        .map(str::to_string)
        .or_else(|| {
            let text = String::from_utf8_lossy(body);
            text.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .and_then(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.eq_ignore_ascii_case("Content-Type")
                        .then(|| value.trim().to_string())
                })
        })?;
    header_parameter(&declared, "boundary").map(str::to_string)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_line(data: &[u8]) -> (&[u8], &[u8]) {
    match data.iter().position(|&b| b == b'\n') {
        Some(end) => (&data[..end], &data[end + 1..]),
        None => (data, &[]),
    }
}

fn strip_line_end(mut data: &[u8]) -> &[u8] {
    if let Some(rest) = data.strip_suffix(b"\n") {
        data = rest;
    }
    data.strip_suffix(b"\r").unwrap_or(data)
}

/// Splits a body on `--boundary` delimiters.
#[must_use]
pub fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<Part<'a>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();

    let Some(first) = find(body, delimiter) else {
        return parts;
    };
    let mut rest = &body[first + delimiter.len()..];
    loop {
        if rest.starts_with(b"--") {
            break;
        }
        // remainder of the delimiter line
        let (_, mut cursor) = split_line(rest);

        let mut headers = Vec::new();
        loop {
            let (line, next) = split_line(cursor);
            let line = String::from_utf8_lossy(line);
            let line = line.trim();
            cursor = next;
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
            if cursor.is_empty() {
                break;
            }
        }

        match find(cursor, delimiter) {
            Some(end) => {
                parts.push(Part {
                    headers,
                    content: strip_line_end(&cursor[..end]),
                });
                rest = &cursor[end + delimiter.len()..];
            },
            None => {
                parts.push(Part {
                    headers,
                    content: strip_line_end(cursor),
                });
                break;
            },
        }
    }
    parts
}

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
}

fn is_json(part: &Part<'_>) -> bool {
    match part.filename().and_then(extension) {
        Some(extension) => extension == "json" || extension == "geojson",
        None => part.content.trim_ascii_start().first() == Some(&b'{'),
    }
}

/// Decodes the supported parts of a multipart body.
///
/// # Errors
///
/// Returns [`ResponseError::MissingFeatureCollection`] when no boundary or no usable part is
/// found, and the decoding error of the first malformed part.
pub fn decode_multipart(
    body: &[u8],
    content_type: Option<&str>,
    options: &DecodeOptions,
) -> Result<CollectionDecoder> {
    let boundary = boundary(body, content_type).ok_or(ResponseError::MissingFeatureCollection)?;
    let parts = split_parts(body, &boundary);
    debug!("multipart response with {} parts", parts.len());

    let mut collections: Vec<RawCollection> = Vec::new();
    for part in &parts {
        if is_json(part) {
            let collection = wfs_geojson::parse_feature_collection(part.content, "multipart part")
                .map_err(|source| ResponseError::InvalidJson { source })?;
            collections.push(collection);
            continue;
        }
        let Some(name) = part.filename() else {
            continue;
        };
        if extension(name).as_deref() != Some("csv") {
            continue;
        }
        let csvt_name = format!("{name}t");
        let csvt = parts
            .iter()
            .find(|other| other.filename().is_some_and(|n| n.eq_ignore_ascii_case(&csvt_name)))
            .map(|other| other.content);
        let collection = parse_csv_part(part.content, csvt, &CsvPartOptions::default(), name)
            .map_err(|source| ResponseError::InvalidFeatures { source })?;
        collections.push(collection);
    }

    if collections.is_empty() {
        warn!("multipart response holds no GeoJSON or CSV part");
        return Err(ResponseError::MissingFeatureCollection.into());
    }
    Ok(CollectionDecoder::from_collections(collections, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::ResponseDecoder;
    use geo_types::{Geometry, Point};
    use wfs_shared::RawValue;

    const JSON_BODY: &str = "Content-Type: multipart/mixed; boundary=\"my_boundary\"\n\r\n\r\n--my_boundary\nContent-Type: text/plain; charset=us-ascii\nContent-Disposition: attachment; filename=my.json\n\r\n{\n\"type\":\"FeatureCollection\",\n\"totalFeatures\":\"unknown\",\n\"features\":[\n    {\n        \"type\":\"Feature\",\n        \"id\":\"my_layer.1\",\n        \"geometry\":{\"type\":\"Point\",\"coordinates\":[2, 49]},\n        \"properties\":{\"str\":\"str\"}\n    }\n]\n}\n--my_boundary--\n";

    const CSV_BODY: &str = "Content-Type: multipart/mixed; boundary=\"my_boundary\"\n\r\n\r\n--my_boundary\nContent-Disposition: attachment; filename=my.csvt\n\r\nString,String\n--my_boundary\nContent-Disposition: attachment; filename=my.csv\n\r\nstr,WKT\nstr,\"POINT(2 49)\"\n--my_boundary--\n";

    fn options() -> DecodeOptions {
        DecodeOptions {
            streaming: true,
            lat_long_order: true,
            type_name: "my_layer".into(),
        }
    }

    fn single_feature(body: &str) -> crate::decoder::DecodedFeature {
        let mut decoder = decode_multipart(body.as_bytes(), None, &options()).unwrap();
        decoder.next_record().unwrap().unwrap().into_feature().unwrap()
    }

    #[test]
    fn boundary_from_body_or_header() {
        assert_eq!(boundary(JSON_BODY.as_bytes(), None).as_deref(), Some("my_boundary"));
        assert_eq!(
            boundary(b"--x\n", Some("multipart/mixed; boundary=x")).as_deref(),
            Some("x")
        );
        assert_eq!(boundary(b"<a/>", Some("text/xml")), None);
    }

    #[test]
    fn json_part() {
        let parts = split_parts(JSON_BODY.as_bytes(), "my_boundary");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename(), Some("my.json"));
        assert!(parts[0].content.starts_with(b"{"));
        assert!(parts[0].content.ends_with(b"}"));

        let feature = single_feature(JSON_BODY);
        assert_eq!(feature.property("str"), Some(&RawValue::Text("str".into())));
        assert_eq!(feature.geometries[0].1, Geometry::Point(Point::new(49.0, 2.0)));
    }

    #[test]
    fn json_part_without_headers() {
        let body = JSON_BODY.replace(
            "Content-Type: text/plain; charset=us-ascii\nContent-Disposition: attachment; filename=my.json\n",
            "",
        );
        let feature = single_feature(&body);
        assert_eq!(feature.id.as_deref(), Some("my_layer.1"));
    }

    #[test]
    fn csv_pair() {
        let feature = single_feature(CSV_BODY);
        assert_eq!(feature.property("str"), Some(&RawValue::Text("str".into())));
        assert_eq!(feature.geometries[0].1, Geometry::Point(Point::new(49.0, 2.0)));
    }

    #[test]
    fn nothing_usable() {
        let body = "Content-Type: multipart/mixed; boundary=\"b\"\n\r\n--b\nContent-Disposition: attachment; filename=a.txt\n\r\nhello\n--b--\n";
        let err = decode_multipart(body.as_bytes(), None, &options()).unwrap_err();
        assert_eq!(err.to_string(), "Cannot find <FeatureCollection>");
    }
}
