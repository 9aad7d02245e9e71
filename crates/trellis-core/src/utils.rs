//! Shared wire-format helpers
//!
//! Percent coding, query building, byte ranges, cookie headers and HTTP dates.

use crate::query::{Param, Params};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::SystemTime;

/// Check that every `%` starts a two-digit hex escape
fn check_percent(s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(Error::InvalidParameter(format!("invalid %-encoding ({})", s)));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Form-encode bytes (space as `+`)
pub fn escape(bytes: impl AsRef<[u8]>) -> String {
    urlencoding::encode_binary(bytes.as_ref()).replace("%20", "+")
}

/// Percent-encode a path segment (space as `%20`)
pub fn escape_path(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Decode a form-encoded component into raw bytes
pub fn unescape_bytes(s: &str) -> Result<Vec<u8>> {
    check_percent(s)?;
    let spaced = s.replace('+', " ");
    Ok(urlencoding::decode_binary(spaced.as_bytes()).into_owned())
}

/// Decode a form-encoded component, replacing invalid UTF-8
pub fn unescape(s: &str) -> Result<String> {
    let bytes = unescape_bytes(s)?;
    Ok(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Decode a path (no `+` translation)
pub fn unescape_path(s: &str) -> Result<String> {
    check_percent(s)?;
    Ok(String::from_utf8_lossy(&urlencoding::decode_binary(s.as_bytes())).into_owned())
}

/// Build a flat query string
pub fn build_query<K, V>(pairs: &[(K, Option<V>)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{}={}", escape(k.as_ref()), escape(v.as_ref())),
            None => escape(k.as_ref()),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Serialize nested params using the bracket grammar
pub fn build_nested_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| nested_pair(v, &escape(k)))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("&")
}

fn nested_pair(value: &Param, prefix: &str) -> String {
    match value {
        Param::Null => prefix.to_string(),
        Param::String(s) => format!("{}={}", prefix, escape(s)),
        Param::File(f) => format!("{}={}", prefix, escape(f.filename().unwrap_or_default())),
        Param::Array(items) => items
            .iter()
            .map(|v| nested_pair(v, &format!("{}[]", prefix)))
            .collect::<Vec<_>>()
            .join("&"),
        Param::Map(map) => map
            .iter()
            .map(|(k, v)| nested_pair(v, &format!("{}[{}]", prefix, escape(k))))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("&"),
    }
}

/// Range headers with this many specs or more are ignored
pub const MAX_BYTE_RANGES: usize = 100;

/// Parse a `Range` header against a resource size
///
/// `None` means "serve the whole resource" (no header, too many specs, a spec
/// outside the `bytes=\d*-\d*` grammar, a backwards range, or ranges that
/// together exceed the resource). `Some(vec![])` means nothing requested is satisfiable.
pub fn byte_ranges(header: Option<&str>, size: u64) -> Option<Vec<RangeInclusive<u64>>> {
    let header = header?;
    let start = header.find("bytes=")? + "bytes=".len();
    let specs = header[start..].split(';').next().unwrap_or("");
    if specs.trim().is_empty() {
        return None;
    }

    if specs.split(',').nth(MAX_BYTE_RANGES - 1).is_some() {
        return None;
    }

    let size = i128::from(size);
    let mut ranges = Vec::new();

    for spec in specs.split(',') {
        let spec = spec.trim();
        let (first, last) = spec.split_once('-')?;
        let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !digits(first) || !digits(last) {
            return None;
        }

        let (r0, r1) = if first.is_empty() {
            if last.is_empty() {
                return None;
            }
            // Suffix range: the trailing `last` bytes
            let suffix: i128 = last.parse().ok()?;
            ((size - suffix).max(0), size - 1)
        } else {
            let r0: i128 = first.parse().ok()?;
            let r1 = if last.is_empty() {
                size - 1
            } else {
                let r1: i128 = last.parse().ok()?;
                if r1 < r0 {
                    return None;
                }
                r1.min(size - 1)
            };
            (r0, r1)
        };

        if r0 <= r1 {
            ranges.push((r0, r1));
        }
    }

    let total: i128 = ranges.iter().map(|(a, b)| b - a + 1).sum();
    if total > size {
        return None;
    }

    Some(
        ranges
            .into_iter()
            .filter_map(|(a, b)| Some(u64::try_from(a).ok()?..=u64::try_from(b).ok()?))
            .collect(),
    )
}

/// Parse a `Cookie` request header; the first occurrence of a name wins
pub fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for part in header.split(|c| c == ';' || c == ',') {
        let part = part.trim();
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        let name = unescape(name.trim()).unwrap_or_else(|_| name.trim().to_string());
        if name.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"');
        let value = unescape(value).unwrap_or_else(|_| value.to_string());
        cookies.entry(name).or_insert(value);
    }
    cookies
}

/// Format a timestamp as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`)
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP date header value
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
