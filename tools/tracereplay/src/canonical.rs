//! Stable (sorted-key) JSON encoding shared by diffing and archive hashing.
//!
//! Both layers must agree on what "equal" means, so every comparison and every
//! content hash in the crate goes through these functions.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compact encoding with object keys sorted at every depth.
pub fn stable_json(value: &Value) -> String {
    let mut out = String::new();
    write_compact(value, &mut out);
    out
}

/// Same key ordering as [`stable_json`], indented by two spaces.
pub fn stable_json_pretty(value: &Value) -> String {
    let mut out = String::new();
    write_pretty(value, 0, &mut out);
    out
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_compact(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&encode_scalar(&Value::String(key.clone())));
                out.push(':');
                if let Some(child) = map.get(key) {
                    write_compact(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_compact(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&encode_scalar(scalar)),
    }
}

fn write_pretty(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push_str("{\n");
            let last = keys.len() - 1;
            for (i, key) in keys.into_iter().enumerate() {
                push_indent(depth + 1, out);
                out.push_str(&encode_scalar(&Value::String(key.clone())));
                out.push_str(": ");
                if let Some(child) = map.get(key) {
                    write_pretty(child, depth + 1, out);
                }
                if i < last {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(depth, out);
            out.push('}');
        }
        Value::Array(items) if !items.is_empty() => {
            out.push_str("[\n");
            let last = items.len() - 1;
            for (i, item) in items.iter().enumerate() {
                push_indent(depth + 1, out);
                write_pretty(item, depth + 1, out);
                if i < last {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(depth, out);
            out.push(']');
        }
        Value::Object(_) => out.push_str("{}"),
        Value::Array(_) => out.push_str("[]"),
        scalar => out.push_str(&encode_scalar(scalar)),
    }
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

// Scalars (strings, numbers, bools, null) have exactly one serde_json encoding.
fn encode_scalar(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
