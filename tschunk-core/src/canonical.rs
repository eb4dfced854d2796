//! Canonical JSON
//!
//! Every JSON document the codec emits goes through [`canonical_json`]:
//! object keys are sorted at every depth, strings are trimmed and stripped of
//! NUL characters, entries whose key normalizes to empty are dropped, empty
//! objects collapse to `null`, and numbers are widened to `f64`. Two logically
//! equal values always produce the same bytes, which both the blob meta
//! section and the object key seed depend on.

use crate::{ChunkError, Result};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Trim surrounding whitespace and remove NUL characters
pub fn normalize_string(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.contains('\0') {
        trimmed.replace('\0', "").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Normalize keys and values of a string map, dropping empty keys
pub fn normalize_string_map(m: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    m.iter()
        .filter_map(|(k, v)| {
            let k = normalize_string(k);
            if k.is_empty() {
                None
            } else {
                Some((k, normalize_string(v)))
            }
        })
        .collect()
}

/// `k1=v1;k2=v2` rendering of a string map, keys ascending
pub fn canonical_map_string(m: &BTreeMap<String, String>) -> String {
    let mut s = String::new();
    for (i, (k, v)) in m.iter().enumerate() {
        if i > 0 {
            s.push(';');
        }
        s.push_str(k);
        s.push('=');
        s.push_str(v);
    }
    s
}

/// Serialize `value` to canonical JSON bytes
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let raw = serde_json::to_value(value).map_err(|e| ChunkError::Encode(e.to_string()))?;
    let normalized = normalize_value(raw);
    serde_json::to_vec(&normalized).map_err(|e| ChunkError::Encode(e.to_string()))
}

fn normalize_value(v: Value) -> Value {
    match v {
        Value::String(s) => Value::String(normalize_string(&s)),
        Value::Number(n) => normalize_number(n),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| {
                    let k = normalize_string(&k);
                    if k.is_empty() {
                        None
                    } else {
                        Some((k, normalize_value(v)))
                    }
                })
                .collect();
            if sorted.is_empty() {
                return Value::Null;
            }
            // insertion order is kept under serde_json's `preserve_order`
            let mut out = Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        other => other,
    }
}

fn normalize_number(n: Number) -> Value {
    match n.as_f64().and_then(Number::from_f64) {
        Some(f) => Value::Number(f),
        // non-finite cannot be represented in JSON
        None => Value::Null,
    }
}
