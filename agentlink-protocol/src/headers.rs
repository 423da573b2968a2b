//! Header hygiene and body classification shared by both directions of a
//! forwarded request.

use agentlink_common::{ENCODING_BASE64, ENCODING_HEADER};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Header map as carried on the wire (lowercase names, one value per name)
pub type Headers = BTreeMap<String, String>;

/// Connection-scoped headers that must not cross the tunnel.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "upgrade",
    "proxy-connection",
    "transfer-encoding",
    "host",
    "content-length",
    "keep-alive",
    "te",
    "trailer",
];

/// Case-insensitive membership test against [`HOP_BY_HOP`].
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Drop hop-by-hop headers and the encoding marker, lowercasing the rest.
pub fn strip_hop_by_hop<'a, I>(headers: I) -> Headers
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut out = Headers::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case(ENCODING_HEADER) {
            continue;
        }
        let name = name.to_ascii_lowercase();
        match out.get_mut(&name) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                out.insert(name, value.clone());
            }
        }
    }
    out
}

/// Whether a header map marks its body as base64.
pub fn is_base64_encoded(headers: &Headers) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case(ENCODING_HEADER)
            && value.trim().eq_ignore_ascii_case(ENCODING_BASE64)
    })
}

/// Case-insensitive header lookup.
pub fn get_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Whether a `Content-Type` is carried as UTF-8 text rather than base64.
///
/// A missing content type counts as binary.
pub fn is_text_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || matches!(
            essence.as_str(),
            "application/json" | "application/xml" | "application/javascript"
        )
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
}

/// Accepts header values as strings, numbers, booleans or arrays of those.
pub(crate) fn deserialize_headers<'de, D>(deserializer: D) -> Result<Headers, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| flatten_value(&value).map(|v| (name, v)))
        .collect())
}

fn flatten_value(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(flatten_value).collect();
            Some(parts.join(", "))
        }
        Value::Object(_) => None,
    }
}
