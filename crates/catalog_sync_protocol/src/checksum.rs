//! Content checksums over an entity's domain fields.
//!
//! The digest is SHA-256 over a canonical JSON rendering of the payload:
//! object keys sorted bytewise at every depth, no insignificant whitespace,
//! strings as `serde_json` prints them. Integral floats within the exactly
//! representable range print as integers, so `5` and `5.0` hash alike; other
//! numbers print as `serde_json` prints them. Envelope fields never take
//! part, so two replicas holding the same domain data agree on the digest no
//! matter which revisions or timestamps brought them there.

use crate::entity::{Entity, Payload};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Computes the checksum of a payload as lowercase hex.
pub fn checksum(fields: &Payload) -> String {
    let mut canonical = String::new();
    write_object(fields.iter(), &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Computes the checksum of an entity's domain fields.
pub fn entity_checksum(entity: &Entity) -> String {
    checksum(&entity.fields)
}

/// Renders a JSON value canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map.iter(), out),
    }
}

// Largest magnitude below which every integer is an exact f64 (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

fn write_number(n: &Number, out: &mut String) {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => {
            out.push_str(&(f as i64).to_string());
        }
        _ => out.push_str(&n.to_string()),
    }
}

// Sorting here instead of trusting the map keeps the digest stable even when
// serde_json is built with `preserve_order`.
fn write_object<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>, out: &mut String) {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_value(value, out);
    }
    out.push('}');
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a &str cannot fail.
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => out.push_str("\"\""),
    }
}
