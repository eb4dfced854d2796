//! Content-addressed object keys
//!
//! A chunk's key is derived from what it describes, not from when it was
//! written: the canonical meta JSON plus every series key and its point
//! count. Flushing the same buffered data twice names the same object.

use crate::config::DEFAULT_OBJECT_KEY_PREFIX;
use crate::series::SeriesBuf;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Hex characters of the digest kept in the key
pub const KEY_HASH_LEN: usize = 24;

/// Lowercase hex sha256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Trim whitespace and trailing slashes, falling back to the default prefix
pub fn normalize_prefix(prefix: &str) -> &str {
    let p = prefix.trim().trim_end_matches('/');
    if p.is_empty() {
        DEFAULT_OBJECT_KEY_PREFIX
    } else {
        p
    }
}

/// `meta_json \n` then `canonical_key \n point_count \n` per series
pub fn key_seed(meta_json: &[u8], series: &[SeriesBuf]) -> Vec<u8> {
    let mut seed = Vec::with_capacity(meta_json.len() + 1 + series.len() * 64);
    seed.extend_from_slice(meta_json);
    seed.push(b'\n');
    for sb in series {
        seed.extend_from_slice(sb.key.canonical().as_bytes());
        seed.push(b'\n');
        seed.extend_from_slice(sb.points.len().to_string().as_bytes());
        seed.push(b'\n');
    }
    seed
}

/// `<prefix>/tschunk_<24 hex>.bin`
pub fn object_key(prefix: &str, meta_json: &[u8], series: &[SeriesBuf]) -> String {
    let digest = sha256_hex(&key_seed(meta_json, series));
    format!(
        "{}/tschunk_{}.bin",
        normalize_prefix(prefix),
        &digest[..KEY_HASH_LEN]
    )
}
