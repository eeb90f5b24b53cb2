//! Multipart payload construction for callbacks

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const DEFAULT_MIMETYPE: &str = "text/plain";

/// `data:<type>,<base64>` URIs embedded in recorded payloads
static DATA_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data:[^,]+,([A-Za-z0-9+/=\n\r]+)").unwrap());

/// One part of a callback body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPart {
    pub name: String,
    pub mimetype: String,
    pub content: Vec<u8>,
}

/// Build callback parts from recorded payload items
///
/// Items without a `name` are skipped. A repeated name keeps the position of
/// its first occurrence and the content of its last.
pub fn build_parts(data: &[Value]) -> Vec<CallbackPart> {
    let mut parts: Vec<CallbackPart> = Vec::new();

    for item in data {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(name) = obj.get("name").and_then(Value::as_str) else {
            continue;
        };

        let mimetype = obj
            .get("mimetype")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_MIMETYPE);
        let content = obj
            .get("data")
            .filter(|v| !v.is_null())
            .or_else(|| obj.get("value"));

        let part = CallbackPart {
            name: name.to_string(),
            mimetype: mimetype.to_string(),
            content: decode_content(content),
        };

        match parts.iter_mut().find(|p| p.name == part.name) {
            Some(existing) => *existing = part,
            None => parts.push(part),
        }
    }

    parts
}

/// Raw bytes of a recorded content value
///
/// Strings are trimmed; base64 data URIs are decoded, falling back to the
/// text itself when the payload is not valid base64. Other JSON values are
/// sent as compact JSON.
pub fn decode_content(value: Option<&Value>) -> Vec<u8> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => decode_text(s.trim()),
        Some(other) => other.to_string().into_bytes(),
    }
}

fn decode_text(text: &str) -> Vec<u8> {
    if let Some(caps) = DATA_URI.captures(text) {
        let encoded: String = caps[1]
            .chars()
            .filter(|c| !matches!(c, '\n' | '\r'))
            .collect();
        if let Ok(bytes) = STANDARD.decode(encoded) {
            return bytes;
        }
    }
    text.as_bytes().to_vec()
}
