//! Chunk compaction
//!
//! Merges explicit series sets or already decoded chunks into one
//! deterministic series set, and optionally flushes the result as a single
//! new chunk. Ordering follows the writer: series by canonical key, points by
//! (ts, value, canonical meta). Duplicate timestamps are only collapsed when
//! `deduplicate` is set.

use crate::canonical::normalize_string;
use crate::config;
use crate::merge::sort_points;
use crate::reader::{DecodedChunk, DecodedSeries};
use crate::series::{dedupe_sorted, DuplicatePolicy, PointBuf, SeriesBuf};
use crate::store::Sink;
use crate::types::{ChunkMeta, ChunkRef, Point, SeriesKey};
use crate::writer::{Writer, WriterOptions};
use crate::{ChunkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Compaction configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionOptions {
    /// Cap on series in the output (0 = default)
    pub max_series_per_chunk: usize,
    /// Cap on total points in the output (0 = default)
    pub max_points_per_chunk: usize,
    /// Cap on points per series (0 = unlimited)
    pub max_points_per_series: usize,
    pub allow_nan: bool,
    /// Collapse points sharing a timestamp
    pub deduplicate: bool,
    pub duplicate_policy: DuplicatePolicy,
    /// Drop points outside `[meta.start, meta.end)` instead of only warning
    pub drop_out_of_range: bool,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            max_series_per_chunk: config::MAX_SERIES_PER_CHUNK,
            max_points_per_chunk: config::MAX_POINTS_PER_CHUNK,
            max_points_per_series: 0,
            allow_nan: false,
            deduplicate: false,
            duplicate_policy: DuplicatePolicy::KeepFirst,
            drop_out_of_range: false,
        }
    }
}

impl CompactionOptions {
    /// Replace zero chunk caps with the defaults
    pub fn normalized(mut self) -> Self {
        if self.max_series_per_chunk == 0 {
            self.max_series_per_chunk = config::MAX_SERIES_PER_CHUNK;
        }
        if self.max_points_per_chunk == 0 {
            self.max_points_per_chunk = config::MAX_POINTS_PER_CHUNK;
        }
        self
    }
}

/// One series and its points, as fed into or produced by compaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoints {
    pub key: SeriesKey,
    #[serde(default)]
    pub points: Vec<Point>,
}

impl SeriesPoints {
    /// Points of a decoded series; decoded points carry no meta
    pub fn from_decoded(ds: &DecodedSeries) -> Self {
        Self {
            key: ds.key.clone(),
            points: ds
                .points
                .iter()
                .map(|dp| Point::new(dp.ts.as_str(), dp.value))
                .collect(),
        }
    }
}

/// Counts and warnings from one compaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactResult {
    /// `compact_warning.NNN` / `compact_window_warning.NNN` -> message
    pub warnings: BTreeMap<String, String>,
    pub series: usize,
    pub points: usize,
    /// Points removed by caps or the meta window (duplicates are not counted)
    pub dropped: usize,
}

struct Compacted {
    series: Vec<SeriesBuf>,
    warnings: BTreeMap<String, String>,
    points: usize,
    dropped: usize,
}

impl Compacted {
    fn result(&self) -> CompactResult {
        CompactResult {
            warnings: self.warnings.clone(),
            series: self.series.len(),
            points: self.points,
            dropped: self.dropped,
        }
    }
}

/// Merge, sort, optionally dedupe and cap an explicit series set
pub fn compact_series_points(
    input: &[SeriesPoints],
    opts: &CompactionOptions,
) -> Result<(Vec<SeriesPoints>, CompactResult)> {
    let compacted = compact(input, &opts.normalized())?;
    let res = compacted.result();
    let out = compacted
        .series
        .into_iter()
        .map(|sb| SeriesPoints {
            points: sb.points.iter().map(PointBuf::to_point).collect(),
            key: sb.key,
        })
        .collect();
    Ok((out, res))
}

/// Compact every series of several decoded chunks of one tenant/namespace
pub fn compact_decoded_chunks(
    chunks: &[DecodedChunk],
    opts: &CompactionOptions,
) -> Result<(Vec<SeriesPoints>, CompactResult)> {
    let first = chunks
        .first()
        .ok_or_else(|| ChunkError::InvalidPayload("no chunks to compact".into()))?;
    let tenant = normalize_string(&first.meta.tenant_id);
    let namespace = normalize_string(&first.meta.namespace);
    if tenant.is_empty() || namespace.is_empty() {
        return Err(ChunkError::InvalidMeta("tenant_id/namespace required".into()));
    }

    let mut collected = Vec::new();
    for chunk in chunks {
        if normalize_string(&chunk.meta.tenant_id) != tenant
            || normalize_string(&chunk.meta.namespace) != namespace
        {
            return Err(ChunkError::InvalidMeta("mixed tenant/namespace".into()));
        }
        collected.extend(chunk.series.iter().map(SeriesPoints::from_decoded));
    }

    compact_series_points(&collected, opts)
}

/// Compact `series` into the window described by `meta` and flush one chunk
pub fn compact_to_chunk(
    cancel: &CancellationToken,
    sink: &dyn Sink,
    meta: &ChunkMeta,
    object_key_prefix: &str,
    series: &[SeriesPoints],
    opts: &CompactionOptions,
) -> Result<(ChunkRef, CompactResult)> {
    let o = opts.normalized();
    let mut meta = meta.normalized();
    let window = meta.validate()?;

    let mut compacted = compact(series, &o)?;

    let mut window_warnings = Vec::new();
    let mut window_dropped = 0usize;
    for sb in &mut compacted.series {
        if sb.key.tenant_id != meta.tenant_id || sb.key.namespace != meta.namespace {
            return Err(ChunkError::InvalidMeta(format!(
                "series {} does not belong to {}/{}",
                sb.key, meta.tenant_id, meta.namespace
            )));
        }
        let outside = sb.points.iter().filter(|p| !window.contains(p.ts)).count();
        if outside == 0 {
            continue;
        }
        if o.drop_out_of_range {
            sb.points.retain(|p| window.contains(p.ts));
            window_dropped += outside;
        } else {
            window_warnings.push(format!(
                "points_outside_meta_window:{}:count={}",
                sb.key.canonical(),
                outside
            ));
        }
    }
    compacted.series.retain(|sb| !sb.points.is_empty());
    if compacted.series.is_empty() {
        return Err(ChunkError::TooLarge("no data in window".into()));
    }

    window_warnings.sort();
    for (i, w) in window_warnings.into_iter().enumerate() {
        warn!(tenant = %meta.tenant_id, "{}", w);
        compacted
            .warnings
            .insert(format!("compact_window_warning.{:03}", i + 1), w);
    }
    compacted.dropped += window_dropped;
    compacted.points = compacted.series.iter().map(|sb| sb.points.len()).sum();

    for (k, v) in &compacted.warnings {
        meta.meta.insert(k.clone(), v.clone());
    }
    if meta.schema_version.is_empty() {
        meta.schema_version = config::DEFAULT_SCHEMA_VERSION.to_string();
    }

    let res = compacted.result();
    let writer = Writer::new(WriterOptions {
        compress_body: false,
        max_points_per_chunk: o.max_points_per_chunk,
        max_series_per_chunk: o.max_series_per_chunk,
        allow_nan: o.allow_nan,
    });
    for sb in compacted.series {
        writer.extend_series(sb);
    }
    let chunk_ref = writer.flush(cancel, sink, &meta, object_key_prefix)?;

    info!(
        tenant = %meta.tenant_id,
        object_key = %chunk_ref.object_key,
        series = res.series,
        points = res.points,
        dropped = res.dropped,
        "Compacted chunk"
    );

    Ok((chunk_ref, res))
}

fn compact(input: &[SeriesPoints], o: &CompactionOptions) -> Result<Compacted> {
    if input.is_empty() {
        return Err(ChunkError::InvalidPayload("no series to compact".into()));
    }

    let mut by_key: HashMap<String, SeriesBuf> = HashMap::with_capacity(input.len());
    for sp in input {
        let key = sp.key.normalized();
        key.validate()?;
        let points = sp
            .points
            .iter()
            .map(|p| PointBuf::from_point(p, o.allow_nan))
            .collect::<Result<Vec<_>>>()?;
        by_key
            .entry(key.canonical())
            .or_insert_with(|| SeriesBuf::new(key))
            .points
            .extend(points);
    }

    let mut keyed: Vec<(String, SeriesBuf)> = by_key.into_iter().collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut warnings = Vec::new();
    if keyed.len() > o.max_series_per_chunk {
        warnings.push(format!(
            "series_truncated:showing={} of={}",
            o.max_series_per_chunk,
            keyed.len()
        ));
        keyed.truncate(o.max_series_per_chunk);
    }

    let mut out = Vec::with_capacity(keyed.len());
    let mut total = 0usize;
    let mut dropped = 0usize;
    for (canonical, mut sb) in keyed {
        let mut points = sort_points(std::mem::take(&mut sb.points));
        if o.deduplicate {
            points = dedupe_sorted(points, o.duplicate_policy);
        }
        if o.max_points_per_series > 0 && points.len() > o.max_points_per_series {
            warnings.push(format!(
                "series_points_truncated:{}:showing={} of={}",
                canonical,
                o.max_points_per_series,
                points.len()
            ));
            dropped += points.len() - o.max_points_per_series;
            points.truncate(o.max_points_per_series);
        }
        total += points.len();
        sb.points = points;
        out.push(sb);
    }

    if total > o.max_points_per_chunk {
        let mut remain = o.max_points_per_chunk;
        for sb in &mut out {
            let keep = sb.points.len().min(remain);
            dropped += sb.points.len() - keep;
            sb.points.truncate(keep);
            remain -= keep;
        }
        out.retain(|sb| !sb.points.is_empty());
        warnings.push(format!(
            "points_truncated:showing={} of={}",
            o.max_points_per_chunk, total
        ));
        total = o.max_points_per_chunk;
    }

    if out.iter().all(|sb| sb.points.is_empty()) {
        return Err(ChunkError::TooLarge("no data after compaction".into()));
    }

    let warnings = warnings
        .into_iter()
        .enumerate()
        .map(|(i, w)| (format!("compact_warning.{:03}", i + 1), w))
        .collect();

    Ok(Compacted {
        series: out,
        warnings,
        points: total,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{decode, ReaderOptions};
    use crate::store::MemoryStore;

    fn key(metric: &str) -> SeriesKey {
        SeriesKey::new("t1", "ns", metric, "host")
    }

    fn ts(sec: u32) -> String {
        format!("2026-01-01T00:00:{:02}Z", sec)
    }

    fn sp(metric: &str, points: &[(u32, f64)]) -> SeriesPoints {
        SeriesPoints {
            key: key(metric),
            points: points.iter().map(|&(s, v)| Point::new(ts(s), v)).collect(),
        }
    }

    #[test]
    fn test_merges_and_sorts_without_dedup() {
        let input = vec![
            sp("b", &[(3, 1.0)]),
            sp("a", &[(2, 2.0), (1, 1.0)]),
            sp("b", &[(3, 0.5)]),
        ];
        let (out, res) = compact_series_points(&input, &CompactionOptions::default()).unwrap();
        assert_eq!(res.series, 2);
        assert_eq!(res.points, 4);
        assert!(res.warnings.is_empty());
        assert_eq!(out[0].key.metric, "a");
        assert_eq!(out[0].points[0].ts, ts(1));
        let values: Vec<f64> = out[1].points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0.5, 1.0]);
    }

    #[test]
    fn test_duplicate_policies() {
        let input = vec![sp("a", &[(1, 5.0), (1, 2.0), (1, 9.0), (2, 1.0)])];
        let first = CompactionOptions {
            deduplicate: true,
            ..Default::default()
        };
        let (out, res) = compact_series_points(&input, &first).unwrap();
        assert_eq!(res.points, 2);
        assert_eq!(out[0].points[0].value, 2.0);
        assert_eq!(res.dropped, 0);

        let last = CompactionOptions {
            duplicate_policy: DuplicatePolicy::KeepLast,
            ..first
        };
        let (out, _) = compact_series_points(&input, &last).unwrap();
        assert_eq!(out[0].points[0].value, 9.0);
    }

    #[test]
    fn test_caps_and_warnings() {
        let input = vec![
            sp("a", &[(1, 1.0), (2, 2.0), (3, 3.0)]),
            sp("b", &[(1, 1.0), (2, 2.0)]),
            sp("c", &[(1, 1.0)]),
        ];
        let opts = CompactionOptions {
            max_points_per_series: 2,
            max_points_per_chunk: 3,
            ..Default::default()
        };
        let (out, res) = compact_series_points(&input, &opts).unwrap();
        assert_eq!(
            res.warnings["compact_warning.001"],
            "series_points_truncated:t1|ns|a|host||:showing=2 of=3"
        );
        assert_eq!(res.warnings["compact_warning.002"], "points_truncated:showing=3 of=5");
        assert_eq!(res.points, 3);
        assert_eq!(res.dropped, 3);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].points.len(), 1);
    }

    #[test]
    fn test_invalid_input() {
        assert!(compact_series_points(&[], &CompactionOptions::default()).is_err());
        let bad = vec![SeriesPoints {
            key: SeriesKey::new("t1", "ns", "", "host"),
            points: vec![],
        }];
        assert!(matches!(
            compact_series_points(&bad, &CompactionOptions::default()),
            Err(ChunkError::InvalidKey(_))
        ));
        let nan = vec![sp("a", &[(1, f64::NAN)])];
        assert!(matches!(
            compact_series_points(&nan, &CompactionOptions::default()),
            Err(ChunkError::InvalidPoint(_))
        ));
        let empty = vec![sp("a", &[])];
        assert!(matches!(
            compact_series_points(&empty, &CompactionOptions::default()),
            Err(ChunkError::TooLarge(_))
        ));
    }

    #[test]
    fn test_compact_to_chunk_window() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let meta = ChunkMeta::new("t1", "ns", ts(0), ts(10));
        let input = vec![
            sp("m1", &[(1, 1.0), (1, 2.0), (5, 5.0), (20, 20.0)]),
            sp("m2", &[(2, 2.0)]),
        ];
        let opts = CompactionOptions {
            deduplicate: true,
            drop_out_of_range: true,
            ..Default::default()
        };

        let (r, res) =
            compact_to_chunk(&cancel, &store, &meta, "compacted", &input, &opts).unwrap();
        assert_eq!(store.put_count(), 1);
        assert_eq!((r.series, r.points), (2, 3));
        assert_eq!(res.dropped, 1);
        assert_eq!((res.series, res.points), (2, 3));

        let obj = store.object("t1", &r.object_key).unwrap();
        let decoded = decode(&obj.data, &ReaderOptions::default()).unwrap();
        let m1 = &decoded.series[0];
        assert_eq!(m1.key.metric, "m1");
        assert_eq!(m1.points.len(), 2);
        assert_eq!(m1.points[0].ts, "2026-01-01T00:00:01Z");
        assert_eq!(m1.points[0].value, 1.0);
    }

    #[test]
    fn test_compact_to_chunk_warns_outside_window() {
        let store = MemoryStore::new();
        let meta = ChunkMeta::new("t1", "ns", ts(0), ts(10));
        let input = vec![sp("m1", &[(1, 1.0), (20, 20.0)])];
        let (r, res) = compact_to_chunk(
            &CancellationToken::new(),
            &store,
            &meta,
            "",
            &input,
            &CompactionOptions::default(),
        )
        .unwrap();
        assert_eq!(r.points, 2);
        assert_eq!(res.dropped, 0);
        let w = "points_outside_meta_window:t1|ns|m1|host||:count=1";
        assert_eq!(res.warnings["compact_window_warning.001"], w);
        let obj = store.object("t1", &r.object_key).unwrap();
        assert_eq!(obj.meta["meta.compact_window_warning.001"], w);
    }

    #[test]
    fn test_compact_to_chunk_rejects_foreign_series() {
        let store = MemoryStore::new();
        let meta = ChunkMeta::new("t2", "ns", ts(0), ts(10));
        let err = compact_to_chunk(
            &CancellationToken::new(),
            &store,
            &meta,
            "",
            &[sp("m1", &[(1, 1.0)])],
            &CompactionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ChunkError::InvalidMeta(_)));
        assert_eq!(store.put_count(), 0);
    }

    #[test]
    fn test_compact_decoded_chunks() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let opts = CompactionOptions::default();
        let first = compact_to_chunk(
            &cancel,
            &store,
            &ChunkMeta::new("t1", "ns", ts(0), ts(10)),
            "",
            &[sp("m1", &[(1, 1.0)])],
            &opts,
        )
        .unwrap()
        .0;
        let second = compact_to_chunk(
            &cancel,
            &store,
            &ChunkMeta::new("t1", "ns", ts(10), ts(20)),
            "",
            &[sp("m1", &[(11, 2.0)]), sp("m2", &[(12, 3.0)])],
            &opts,
        )
        .unwrap()
        .0;

        let chunks: Vec<DecodedChunk> = [first, second]
            .iter()
            .map(|r| {
                let blob = store.object("t1", &r.object_key).unwrap().data;
                decode(&blob, &ReaderOptions::default()).unwrap()
            })
            .collect();
        let (out, res) = compact_decoded_chunks(&chunks, &opts).unwrap();
        assert_eq!((res.series, res.points), (2, 3));
        assert_eq!(out[0].points.len(), 2);

        let mut foreign = chunks.clone();
        foreign[1].meta.namespace = "other".into();
        assert!(matches!(
            compact_decoded_chunks(&foreign, &opts),
            Err(ChunkError::InvalidMeta(_))
        ));
        assert!(compact_decoded_chunks(&[], &opts).is_err());
    }
}
