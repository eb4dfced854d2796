//! Buffered series and points
//!
//! `PointBuf` is the validated, parsed form of a [`Point`]: the timestamp is
//! already resolved to unix nanoseconds and the meta map is normalized, so
//! sorting and encoding never re-parse strings.

use crate::canonical::{canonical_map_string, normalize_string, normalize_string_map};
use crate::types::{format_timestamp, parse_timestamp, Point, SeriesKey, Timestamp};
use crate::{ChunkError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Parsed point held in a series buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PointBuf {
    pub ts: Timestamp,
    pub value: f64,
    pub meta: BTreeMap<String, String>,
}

impl PointBuf {
    /// Normalize and validate a producer point
    pub fn from_point(point: &Point, allow_nan: bool) -> Result<Self> {
        let ts = normalize_string(&point.ts);
        if ts.is_empty() {
            return Err(ChunkError::InvalidPoint("ts required".into()));
        }
        if !allow_nan && !point.value.is_finite() {
            return Err(ChunkError::InvalidPoint("NaN/Inf not allowed".into()));
        }
        let parsed = parse_timestamp(&ts)
            .ok_or_else(|| ChunkError::InvalidPoint(format!("invalid rfc3339 ts: {:?}", ts)))?;
        Ok(Self {
            ts: parsed,
            value: point.value,
            meta: normalize_string_map(&point.meta),
        })
    }

    /// Convert back to a producer point with an RFC3339Nano timestamp
    pub fn to_point(&self) -> Point {
        Point {
            ts: format_timestamp(self.ts),
            value: self.value,
            meta: self.meta.clone(),
        }
    }
}

/// Strict total order: timestamp, then value, then canonical meta string
///
/// `-0.0` and `0.0` compare equal on value so the meta string decides between
/// them; the sign only breaks ties left after meta.
pub fn compare_points(a: &PointBuf, b: &PointBuf) -> Ordering {
    a.ts.cmp(&b.ts)
        .then_with(|| unsigned_zero(a.value).total_cmp(&unsigned_zero(b.value)))
        .then_with(|| {
            if a.meta.is_empty() && b.meta.is_empty() {
                Ordering::Equal
            } else {
                canonical_map_string(&a.meta).cmp(&canonical_map_string(&b.meta))
            }
        })
        .then_with(|| a.value.total_cmp(&b.value))
}

fn unsigned_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

/// One series and its append-only point buffer
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBuf {
    pub key: SeriesKey,
    pub points: Vec<PointBuf>,
}

impl SeriesBuf {
    /// Create an empty buffer for a normalized key
    pub fn new(key: SeriesKey) -> Self {
        Self {
            key,
            points: Vec::new(),
        }
    }
}

/// Which point survives an exact-timestamp collision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// First point after the deterministic sort (lowest value wins)
    #[default]
    KeepFirst,
    /// Last point after the deterministic sort (highest value wins)
    KeepLast,
}

/// Collapse runs of equal timestamps in an already sorted slice
pub fn dedupe_sorted(sorted: Vec<PointBuf>, policy: DuplicatePolicy) -> Vec<PointBuf> {
    if sorted.len() <= 1 {
        return sorted;
    }

    let mut out: Vec<PointBuf> = Vec::with_capacity(sorted.len());
    for p in sorted {
        match out.last_mut() {
            Some(last) if last.ts == p.ts => {
                if policy == DuplicatePolicy::KeepLast {
                    *last = p;
                }
            }
            _ => out.push(p),
        }
    }
    out
}
