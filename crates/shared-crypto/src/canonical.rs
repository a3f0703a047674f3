//! Canonical JSON encoding for signed material.
//!
//! Object keys sort ASCII-ascending recursively, arrays preserve order,
//! primitives encode per JSON. The challenge a peer signs is a top-level
//! string, so its canonical form is simply the JSON string literal, but the
//! encoder handles the full value space so composite payloads can be signed
//! under the same rules.

use serde_json::Value;

/// Encode a JSON value canonically: compact separators, object keys sorted
/// ASCII-ascending at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// The exact bytes a peer must sign to answer a challenge: the UTF-8 bytes
/// of the canonical JSON encoding of the challenge string.
pub fn challenge_signing_bytes(challenge: &str) -> Vec<u8> {
    canonical_json(&Value::String(challenge.to_string())).into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json string encoding of a key is infallible
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Null, Bool, Number, String: serde_json's compact form is canonical
        primitive => out.push_str(&primitive.to_string()),
    }
}
