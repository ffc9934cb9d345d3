//! Stable content hashing and canonical JSON encoding.
//!
//! Every content hash in the engine — file hashes, symbol ids, pack
//! `content_hash` — goes through [`content_hash`] over the bytes produced by
//! [`canonical_json`], so the same logical value always produces the same
//! digest regardless of platform, map iteration order, or float formatting.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 of raw bytes, returned as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Encode a JSON value into its canonical byte form: object keys sorted
/// lexicographically, no insignificant whitespace, numbers in their minimal
/// serde_json representation, UTF-8 throughout.
///
/// Returns `Err` if the value cannot be represented (serde_json values are
/// acyclic by construction, so this only fails on NaN/Infinity floats, which
/// have no canonical JSON form).
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Convenience: content hash of a value's canonical JSON encoding.
pub fn hash_value(value: &Value) -> Result<String, EncodeError> {
    Ok(content_hash(&canonical_json(value)?))
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("value is not finite and has no canonical JSON form")]
    NonFiniteNumber,
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(EncodeError::NonFiniteNumber);
                }
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // Re-sort through a BTreeMap so key order is always lexicographic
            // even if the serde_json map was built with `preserve_order`.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push(b'{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(k, out);
                out.push(b':');
                write_canonical(v, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_json_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Deterministic `symbol_id`: hash of `(file_path, kind, name, span)`.
pub fn symbol_id(file_path: &str, kind: &str, name: &str, start_line: u32, end_line: u32) -> String {
    let v = serde_json::json!({
        "file_path": file_path,
        "kind": kind,
        "name": name,
        "start_line": start_line,
        "end_line": end_line,
    });
    hash_value(&v).expect("symbol id components are always finite")
}

/// Deterministic `pack_id`: hash of `(pack_type, target_id)` — stable across
/// content changes so a pack's identity survives edits; `content_hash`
/// tracks the content itself.
pub fn pack_id(pack_type: &str, target_id: &str) -> String {
    let v = serde_json::json!({ "pack_type": pack_type, "target_id": target_id });
    hash_value(&v).expect("pack id components are always finite")
}
