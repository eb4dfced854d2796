//! Chunk writer
//!
//! Producers append points into per-series buffers; [`Writer::flush`] takes a
//! snapshot of every buffer, sorts, deduplicates and caps it, encodes one
//! CHTS1 blob and hands it to a [`Sink`]. Buffered data survives a flush and
//! is only discarded by [`Writer::reset`].

use crate::canonical::canonical_json;
use crate::codec::{self, CONTENT_TYPE, FLAG_GZIP_BODY};
use crate::merge::sort_points;
use crate::object_key::{object_key, sha256_hex};
use crate::series::{dedupe_sorted, DuplicatePolicy, PointBuf, SeriesBuf};
use crate::store::Sink;
use crate::types::{ChunkMeta, ChunkRef, Point, SeriesKey};
use crate::{config, ChunkError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriterOptions {
    /// Gzip the body section
    pub compress_body: bool,
    /// Cap on points per chunk (0 = default)
    pub max_points_per_chunk: usize,
    /// Cap on series per chunk (0 = default)
    pub max_series_per_chunk: usize,
    /// Accept NaN and infinite values
    pub allow_nan: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compress_body: false,
            max_points_per_chunk: config::MAX_POINTS_PER_CHUNK,
            max_series_per_chunk: config::MAX_SERIES_PER_CHUNK,
            allow_nan: false,
        }
    }
}

impl WriterOptions {
    /// Replace zero caps with the defaults
    pub fn normalized(mut self) -> Self {
        if self.max_points_per_chunk == 0 {
            self.max_points_per_chunk = config::MAX_POINTS_PER_CHUNK;
        }
        if self.max_series_per_chunk == 0 {
            self.max_series_per_chunk = config::MAX_SERIES_PER_CHUNK;
        }
        self
    }
}

/// Buffered counts plus the effective options
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub series: usize,
    pub points: usize,
    pub compress_body: bool,
    pub max_points_per_chunk: usize,
    pub max_series_per_chunk: usize,
}

/// Blob and everything derived from it, before it reaches a sink
struct EncodedChunk {
    meta: ChunkMeta,
    blob: Bytes,
    sha256: String,
    object_key: String,
    series: usize,
    points: usize,
}

/// Concurrent ingestion buffer for one chunk's worth of series
pub struct Writer {
    opts: WriterOptions,
    /// Canonical series key -> buffer
    series: Mutex<HashMap<String, SeriesBuf>>,
}

impl Writer {
    /// Create a writer; zero caps fall back to the defaults
    pub fn new(opts: WriterOptions) -> Self {
        Self {
            opts: opts.normalized(),
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Effective options
    pub fn options(&self) -> &WriterOptions {
        &self.opts
    }

    /// Append one point
    pub fn add_point(&self, key: &SeriesKey, point: &Point) -> Result<()> {
        self.add_series_points(key, std::slice::from_ref(point))
    }

    /// Append a batch of points to one series
    ///
    /// The batch is validated as a whole before anything is buffered, so a
    /// rejected call leaves the writer unchanged.
    pub fn add_series_points(&self, key: &SeriesKey, points: &[Point]) -> Result<()> {
        let key = key.normalized();
        key.validate()?;
        if points.is_empty() {
            return Ok(());
        }

        let parsed = points
            .iter()
            .map(|p| PointBuf::from_point(p, self.opts.allow_nan))
            .collect::<Result<Vec<_>>>()?;

        let canonical = key.canonical();
        let mut series = self.series.lock();
        series
            .entry(canonical)
            .or_insert_with(|| SeriesBuf::new(key))
            .points
            .extend(parsed);
        Ok(())
    }

    /// Append an already validated buffer
    pub(crate) fn extend_series(&self, sb: SeriesBuf) {
        let mut series = self.series.lock();
        series
            .entry(sb.key.canonical())
            .or_insert_with(|| SeriesBuf::new(sb.key.clone()))
            .points
            .extend(sb.points);
    }

    /// Buffered series/point counts
    pub fn stats(&self) -> WriterStats {
        let series = self.series.lock();
        WriterStats {
            series: series.len(),
            points: series.values().map(|s| s.points.len()).sum(),
            compress_body: self.opts.compress_body,
            max_points_per_chunk: self.opts.max_points_per_chunk,
            max_series_per_chunk: self.opts.max_series_per_chunk,
        }
    }

    /// Discard all buffered data
    pub fn reset(&self) {
        self.series.lock().clear();
    }

    /// Encode everything buffered into one chunk and store it
    pub fn flush(
        &self,
        cancel: &CancellationToken,
        sink: &dyn Sink,
        meta: &ChunkMeta,
        object_key_prefix: &str,
    ) -> Result<ChunkRef> {
        let chunk = self.encode(meta, object_key_prefix)?;

        let put_meta = put_metadata(&chunk);
        sink.put(
            cancel,
            &chunk.meta.tenant_id,
            &chunk.object_key,
            CONTENT_TYPE,
            &chunk.blob,
            &put_meta,
        )
        .map_err(ChunkError::Sink)?;

        info!(
            tenant = %chunk.meta.tenant_id,
            namespace = %chunk.meta.namespace,
            object_key = %chunk.object_key,
            series = chunk.series,
            points = chunk.points,
            bytes = chunk.blob.len(),
            "Flushed chunk"
        );

        Ok(ChunkRef {
            object_key: chunk.object_key,
            content_type: CONTENT_TYPE.to_string(),
            bytes: chunk.blob.len() as u64,
            sha256: chunk.sha256,
            start: chunk.meta.start,
            end: chunk.meta.end,
            series: chunk.series,
            points: chunk.points,
        })
    }

    fn snapshot(&self) -> Vec<SeriesBuf> {
        self.series.lock().values().cloned().collect()
    }

    fn encode(&self, meta: &ChunkMeta, prefix: &str) -> Result<EncodedChunk> {
        let mut meta = meta.normalized();
        meta.validate()?;

        let mut series = self.snapshot();

        if let Some(sb) = series
            .iter()
            .find(|sb| sb.key.tenant_id != meta.tenant_id || sb.key.namespace != meta.namespace)
        {
            return Err(ChunkError::InvalidMeta(format!(
                "series {} does not belong to {}/{}",
                sb.key, meta.tenant_id, meta.namespace
            )));
        }

        series.sort_by_cached_key(|sb| sb.key.canonical());

        let warnings = apply_caps(&mut series, &self.opts);
        if series.is_empty() {
            return Err(ChunkError::TooLarge("no data to flush".into()));
        }

        for (i, w) in warnings.iter().enumerate() {
            warn!(tenant = %meta.tenant_id, namespace = %meta.namespace, "{}", w);
            meta.meta.insert(format!("writer_warning.{:03}", i + 1), w.clone());
        }
        if meta.schema_version.is_empty() {
            meta.schema_version = config::DEFAULT_SCHEMA_VERSION.to_string();
        }

        let meta_json = canonical_json(&meta)?;
        let (raw_body, counts) = codec::encode_body(&series)?;

        let mut flags = 0u16;
        let blob = if self.opts.compress_body {
            flags |= FLAG_GZIP_BODY;
            let packed = codec::gzip::compress(&raw_body)?;
            codec::encode_blob(&meta_json, flags, &packed)?
        } else {
            codec::encode_blob(&meta_json, flags, &raw_body)?
        };

        debug!(
            raw_body = raw_body.len(),
            blob = blob.len(),
            flags,
            "Encoded chunk"
        );

        Ok(EncodedChunk {
            sha256: sha256_hex(&blob),
            object_key: object_key(prefix, &meta_json, &series),
            meta,
            blob,
            series: counts.series,
            points: counts.points,
        })
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new(WriterOptions::default())
    }
}

/// Sort and dedupe every series in place, then enforce the series and point caps
///
/// `series` must already be in canonical key order. Returns the warnings in
/// the order they were raised.
fn apply_caps(series: &mut Vec<SeriesBuf>, opts: &WriterOptions) -> Vec<String> {
    let mut warnings = Vec::new();

    if series.len() > opts.max_series_per_chunk {
        warnings.push(format!(
            "series_truncated:showing={} of={}",
            opts.max_series_per_chunk,
            series.len()
        ));
        series.truncate(opts.max_series_per_chunk);
    }

    let mut total = 0usize;
    for sb in series.iter_mut() {
        let sorted = sort_points(std::mem::take(&mut sb.points));
        sb.points = dedupe_sorted(sorted, DuplicatePolicy::KeepFirst);
        total += sb.points.len();
    }

    if total > opts.max_points_per_chunk {
        let mut remain = opts.max_points_per_chunk;
        for sb in series.iter_mut() {
            let keep = sb.points.len().min(remain);
            sb.points.truncate(keep);
            remain -= keep;
        }
        series.retain(|sb| !sb.points.is_empty());
        warnings.push(format!(
            "points_truncated:showing={} of={}",
            opts.max_points_per_chunk, total
        ));
    }

    warnings
}

fn put_metadata(chunk: &EncodedChunk) -> BTreeMap<String, String> {
    let m = &chunk.meta;
    let mut out = BTreeMap::new();
    out.insert("content_type".to_string(), CONTENT_TYPE.to_string());
    out.insert("sha256".to_string(), chunk.sha256.clone());
    out.insert("tenant_id".to_string(), m.tenant_id.clone());
    out.insert("namespace".to_string(), m.namespace.clone());
    out.insert("start".to_string(), m.start.clone());
    out.insert("end".to_string(), m.end.clone());
    out.insert("schema_version".to_string(), m.schema_version.clone());
    for (k, v) in &m.meta {
        out.insert(format!("meta.{}", k), v.clone());
    }
    out
}
