//! Request-prefix fingerprinting (§4.3).
//!
//! Grounded on the teacher's `core/cache_manager/manager.rs` key derivation
//! (stable hash over a normalised request) and its `utils` JSON-canonicalisation
//! helpers; this crate's normalisation rules follow spec §4.3 exactly: sort
//! object keys, replace `data:image` URLs with a short content hash, stringify
//! anything that isn't already a JSON primitive, then SHA-256 the result.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{Fingerprint, Message, MessageContent, ContentPart};

/// The ingredients that make up a cacheable request prefix (§4.3). `history`
/// is every message up to but not including the final user turn; `params` is
/// the caller-visible sampling configuration (temperature, top_p, ...).
pub struct FingerprintInput<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub system: Option<&'a str>,
    pub knowledge: Option<&'a str>,
    pub history: &'a [Message],
    pub params: &'a Value,
}

/// Compute the stable fingerprint for a request prefix (§4.3).
pub fn fingerprint(input: &FingerprintInput<'_>) -> Fingerprint {
    let mut root = Map::new();
    root.insert("provider".into(), Value::String(input.provider.to_string()));
    root.insert("model".into(), Value::String(input.model.to_string()));
    root.insert(
        "system".into(),
        input.system.map(Value::from).unwrap_or(Value::Null),
    );
    root.insert(
        "knowledge".into(),
        input.knowledge.map(Value::from).unwrap_or(Value::Null),
    );
    root.insert(
        "history".into(),
        Value::Array(input.history.iter().map(normalize_message).collect()),
    );
    root.insert("params".into(), canonicalize(input.params));

    let canonical = canonicalize(&Value::Object(root));
    let bytes = serde_json::to_vec(&canonical).expect("canonicalized value always serializes");

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Fingerprint(out)
}

fn normalize_message(msg: &Message) -> Value {
    let content = match &msg.content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Parts(parts) => {
            Value::Array(parts.iter().map(normalize_part).collect())
        }
    };
    let mut map = Map::new();
    map.insert("role".into(), serde_json::to_value(msg.role).unwrap());
    map.insert("content".into(), content);
    Value::Object(map)
}

fn normalize_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { image_url } => {
            serde_json::json!({"type": "image_url", "image_url": hash_image_url(image_url)})
        }
        ContentPart::ToolUse { value } => serde_json::json!({"type": "tool_use", "value": canonicalize(value)}),
        ContentPart::ToolResult { value } => {
            serde_json::json!({"type": "tool_result", "value": canonicalize(value)})
        }
    }
}

/// Replace inline `data:image` payloads with a short stable hash so identical
/// images fingerprint identically without hashing the whole base64 blob into
/// the cache key (§4.3).
fn hash_image_url(url: &str) -> String {
    if url.starts_with("data:image") {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        format!("image_hash:sha256:{}", hex::encode(&digest[..8]))
    } else {
        url.to_string()
    }
}

/// Recursively sort object keys and stringify anything that isn't a JSON
/// primitive, object, or array (§4.3: "stringify unknown leaves").
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
    }
}
