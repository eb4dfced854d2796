//! Core types for the chunk codec

use crate::canonical::{canonical_map_string, normalize_string, normalize_string_map};
use crate::{ChunkError, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp in nanoseconds since Unix epoch (UTC)
pub type Timestamp = i64;

/// Parse an RFC3339 / RFC3339Nano string into unix nanoseconds
///
/// Returns `None` for unparsable input and for instants outside the
/// representable `i64` nanosecond range (roughly years 1677..2262). The date
/// and time must be joined by an uppercase `T` and a UTC suffix must be `Z`.
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = normalize_string(s);
    if s.as_bytes().get(10) != Some(&b'T') || s.ends_with('z') {
        return None;
    }
    DateTime::parse_from_rfc3339(&s)
        .ok()
        .and_then(|t| t.with_timezone(&Utc).timestamp_nanos_opt())
}

/// Format unix nanoseconds as RFC3339 in UTC with a `Z` suffix
///
/// Fractional seconds are printed only when non-zero.
pub fn format_timestamp(ts: Timestamp) -> String {
    Utc.timestamp_nanos(ts)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Identity of one time series
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub tenant_id: String,
    pub namespace: String,
    pub metric: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl SeriesKey {
    /// Create a new series key
    pub fn new(
        tenant_id: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            namespace: namespace.into(),
            metric: metric.into(),
            entity_type: entity_type.into(),
            entity_id: String::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Set the entity id
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = entity_id.into();
        self
    }

    /// Add a tag to the series key
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Copy with every string trimmed and stripped of NUL characters
    pub fn normalized(&self) -> Self {
        Self {
            tenant_id: normalize_string(&self.tenant_id),
            namespace: normalize_string(&self.namespace),
            metric: normalize_string(&self.metric),
            entity_type: normalize_string(&self.entity_type),
            entity_id: normalize_string(&self.entity_id),
            tags: normalize_string_map(&self.tags),
        }
    }

    /// Check required fields on an already normalized key
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.is_empty() || self.namespace.is_empty() {
            return Err(ChunkError::InvalidKey("tenant_id/namespace required".into()));
        }
        if self.metric.is_empty() || self.entity_type.is_empty() {
            return Err(ChunkError::InvalidKey("metric/entity_type required".into()));
        }
        Ok(())
    }

    /// `tenant|namespace|metric|entity_type|entity_id|k1=v1;k2=v2`
    pub fn canonical(&self) -> String {
        let k = self.normalized();
        [
            k.tenant_id.as_str(),
            k.namespace.as_str(),
            k.metric.as_str(),
            k.entity_type.as_str(),
            k.entity_id.as_str(),
            canonical_map_string(&k.tags).as_str(),
        ]
        .join("|")
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// A single timestamped value as supplied by producers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// RFC3339 or RFC3339Nano timestamp
    pub ts: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Point {
    /// Create a new point
    pub fn new(ts: impl Into<String>, value: f64) -> Self {
        Self {
            ts: ts.into(),
            value,
            meta: BTreeMap::new(),
        }
    }

    /// Attach a meta entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (exclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Chunk-level metadata, serialized as the blob meta section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub tenant_id: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub produced_at: String,
    pub start: String,
    pub end: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl ChunkMeta {
    /// Create meta for a tenant/namespace window
    pub fn new(
        tenant_id: impl Into<String>,
        namespace: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            namespace: namespace.into(),
            start: start.into(),
            end: end.into(),
            ..Default::default()
        }
    }

    /// Copy with every string trimmed and stripped of NUL characters
    pub fn normalized(&self) -> Self {
        Self {
            tenant_id: normalize_string(&self.tenant_id),
            namespace: normalize_string(&self.namespace),
            source_id: normalize_string(&self.source_id),
            produced_at: normalize_string(&self.produced_at),
            start: normalize_string(&self.start),
            end: normalize_string(&self.end),
            schema_version: normalize_string(&self.schema_version),
            meta: normalize_string_map(&self.meta),
        }
    }

    /// Validate an already normalized meta and return its window
    pub fn validate(&self) -> Result<TimeRange> {
        if self.tenant_id.is_empty() || self.namespace.is_empty() {
            return Err(ChunkError::InvalidMeta("tenant_id/namespace required".into()));
        }
        if self.start.is_empty() || self.end.is_empty() {
            return Err(ChunkError::InvalidMeta("start/end required".into()));
        }
        let start = parse_meta_time("start", &self.start)?;
        let end = parse_meta_time("end", &self.end)?;
        if end <= start {
            return Err(ChunkError::InvalidMeta("end must be after start".into()));
        }
        if !self.produced_at.is_empty() {
            parse_meta_time("produced_at", &self.produced_at)?;
        }
        Ok(TimeRange::new(start, end))
    }
}

fn parse_meta_time(field: &str, s: &str) -> Result<Timestamp> {
    parse_timestamp(s)
        .ok_or_else(|| ChunkError::InvalidMeta(format!("invalid rfc3339 {}: {:?}", field, s)))
}

/// Record of one persisted chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub object_key: String,
    pub content_type: String,
    pub bytes: u64,
    pub sha256: String,
    pub start: String,
    pub end: String,
    pub series: usize,
    pub points: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_canonical() {
        let key = SeriesKey::new(" t1 ", "ns", "cpu", "host")
            .with_entity_id("h1")
            .with_tag("region", "eu")
            .with_tag("az", "1a");

        assert_eq!(key.canonical(), "t1|ns|cpu|host|h1|az=1a;region=eu");
        assert_eq!(
            SeriesKey::new("t1", "ns", "cpu", "host").canonical(),
            "t1|ns|cpu|host||"
        );
    }

    #[test]
    fn test_series_key_validate() {
        assert!(SeriesKey::new("t", "ns", "m", "e").validate().is_ok());
        let err = SeriesKey::new(" ", "ns", "m", "e").normalized().validate();
        assert!(matches!(err, Err(ChunkError::InvalidKey(_))));
        let err = SeriesKey::new("t", "ns", "m", "").validate();
        assert!(matches!(err, Err(ChunkError::InvalidKey(_))));
    }

    #[test]
    fn test_timestamp_parse_format() {
        let ns = parse_timestamp("2026-01-01T00:00:01Z").unwrap();
        assert_eq!(ns, 1_767_225_601_000_000_000);
        assert_eq!(format_timestamp(ns), "2026-01-01T00:00:01Z");

        let with_offset = parse_timestamp("2026-01-01T02:00:01.5+02:00").unwrap();
        assert_eq!(with_offset, ns + 500_000_000);
        assert_eq!(format_timestamp(with_offset), "2026-01-01T00:00:01.500Z");

        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("2026-01-01 00:00:01Z").is_none());
        assert!(parse_timestamp("2026-01-01t00:00:01Z").is_none());
        assert!(parse_timestamp("2026-01-01T00:00:01z").is_none());
    }

    #[test]
    fn test_meta_validate() {
        let meta = ChunkMeta::new("t", "ns", "2026-01-01T00:00:00Z", "2026-01-01T00:00:10Z");
        let window = meta.validate().unwrap();
        assert_eq!(window.end - window.start, 10_000_000_000);
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));

        let backwards = ChunkMeta::new("t", "ns", "2026-01-01T00:00:10Z", "2026-01-01T00:00:00Z");
        assert!(matches!(backwards.validate(), Err(ChunkError::InvalidMeta(_))));

        let mut bad_produced = meta.clone();
        bad_produced.produced_at = "soon".into();
        assert!(matches!(bad_produced.validate(), Err(ChunkError::InvalidMeta(_))));
    }
}
