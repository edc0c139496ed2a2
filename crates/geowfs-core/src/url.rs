//! Query-string manipulation on endpoint URLs.
//!
//! Endpoint URLs are kept as plain strings: users may hand us URLs with parameters already in
//! them (`OUTPUTFORMAT`, `TYPENAME`, vendor keys), and those must keep their position and
//! spelling. Keys are matched case-insensitively; a replaced key keeps its slot.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left as-is in parameter values the driver adds.
const VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b':')
    .remove(b'_')
    .remove(b',');

/// Percent-encodes a parameter value.
#[must_use]
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, VALUE_ENCODE_SET).to_string()
}

fn split_query(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    }
}

fn key_of(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(key, _)| key)
}

/// Sets `key=value`, replacing an existing occurrence in place or appending it.
///
/// `value` is inserted verbatim; encode it first with [`encode_value`] when needed.
#[must_use]
pub fn add_kvp(url: &str, key: &str, value: &str) -> String {
    let (base, query) = split_query(url);
    let mut pairs: Vec<String> = query
        .map(|q| q.split('&').filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let new_pair = format!("{key}={value}");
    match pairs
        .iter_mut()
        .find(|pair| key_of(pair).eq_ignore_ascii_case(key))
    {
        Some(pair) => *pair = new_pair,
        None => pairs.push(new_pair),
    }
    format!("{base}?{}", pairs.join("&"))
}

/// Removes every occurrence of `key`.
#[must_use]
pub fn remove_param(url: &str, key: &str) -> String {
    let (base, query) = split_query(url);
    let Some(query) = query else {
        return url.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !key_of(pair).eq_ignore_ascii_case(key))
        .collect();
    if kept.is_empty() {
        format!("{base}?")
    } else {
        format!("{base}?{}", kept.join("&"))
    }
}

/// Returns the raw value of `key`, if present.
#[must_use]
pub fn get_param(url: &str, key: &str) -> Option<String> {
    let (_, query) = split_query(url);
    query?
        .split('&')
        .find(|pair| key_of(pair).eq_ignore_ascii_case(key))
        .map(|pair| pair.split_once('=').map_or("", |(_, v)| v).to_string())
}

/// Makes sure the URL ends with `?` or `&` so parameters can be appended.
#[must_use]
pub fn with_query_separator(url: &str) -> String {
    if !url.contains('?') {
        format!("{url}?")
    } else if url.ends_with('?') || url.ends_with('&') {
        url.to_string()
    } else {
        format!("{url}&")
    }
}

/// Whether `url` looks like an HTTP(S) URL as opposed to a local path.
#[must_use]
pub fn is_http_url(url: &str) -> bool {
    ::url::Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}
