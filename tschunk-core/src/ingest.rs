//! JSON ingestion
//!
//! Accepts one `{ "meta": ..., "series": [ { "key": ..., "points": [...] } ] }`
//! document (optionally gzip-compressed), checks that every series belongs to
//! the meta's tenant and namespace, and encodes it into exactly one chunk.

use crate::codec::gzip;
use crate::store::Sink;
use crate::types::{ChunkMeta, ChunkRef, Point, SeriesKey};
use crate::writer::{Writer, WriterOptions};
use crate::{config, ChunkError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Warning recorded when the payload arrived gzip-compressed
pub const WARN_GZIP_DECODED: &str = "payload_gzip_decoded";

/// One ingestion document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPayload {
    pub meta: ChunkMeta,
    #[serde(default)]
    pub series: Vec<SeriesSet>,
}

/// Points for one series key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSet {
    pub key: SeriesKey,
    #[serde(default)]
    pub points: Vec<Point>,
}

/// Ingestion configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Cap on raw and decompressed payload size (0 = default)
    pub max_bytes: usize,
    /// Accept gzip payloads (detected by magic bytes)
    pub allow_gzip: bool,
    /// Reject fields the payload schema does not know
    pub deny_unknown_fields: bool,
    /// Options for the writer each payload is encoded through
    pub writer: WriterOptions,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_bytes: config::INGEST_MAX_BYTES,
            allow_gzip: true,
            deny_unknown_fields: true,
            writer: WriterOptions::default(),
        }
    }
}

/// Turns payloads into stored chunks
#[derive(Debug, Clone, Default)]
pub struct Ingestor {
    opts: IngestOptions,
}

impl Ingestor {
    pub fn new(mut opts: IngestOptions) -> Self {
        if opts.max_bytes == 0 {
            opts.max_bytes = config::INGEST_MAX_BYTES;
        }
        opts.writer = opts.writer.normalized();
        Self { opts }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.opts
    }

    /// Read, decode and store one payload
    pub fn ingest<R: Read>(
        &self,
        cancel: &CancellationToken,
        reader: R,
        sink: &dyn Sink,
        object_key_prefix: &str,
    ) -> Result<(ChunkRef, Vec<String>)> {
        let mut raw = Vec::new();
        reader
            .take(self.opts.max_bytes as u64 + 1)
            .read_to_end(&mut raw)?;
        if raw.len() > self.opts.max_bytes {
            return Err(ChunkError::TooLarge(format!(
                "payload exceeds {} bytes",
                self.opts.max_bytes
            )));
        }
        let (payload, warnings) = self.decode_payload(&raw)?;
        self.ingest_payload(cancel, payload, sink, object_key_prefix, warnings)
    }

    /// Parse raw payload bytes, returning the payload and decode warnings
    pub fn decode_payload(&self, raw: &[u8]) -> Result<(IngestPayload, Vec<String>)> {
        let mut warnings = Vec::new();
        let inflated;
        let data = if self.opts.allow_gzip && gzip::looks_like_gzip(raw) {
            inflated = gzip::decompress(raw, self.opts.max_bytes).map_err(|e| match e {
                ChunkError::TooLarge(m) => ChunkError::TooLarge(m),
                other => ChunkError::InvalidPayload(format!("gzip decode failed: {}", other)),
            })?;
            warnings.push(WARN_GZIP_DECODED.to_string());
            &inflated[..]
        } else {
            raw
        };

        let mut de = serde_json::Deserializer::from_slice(data);
        let value = Value::deserialize(&mut de)
            .map_err(|e| ChunkError::InvalidPayload(format!("invalid json: {}", e)))?;
        de.end()
            .map_err(|_| ChunkError::InvalidPayload("trailing data".into()))?;

        if self.opts.deny_unknown_fields {
            check_known_fields(&value)?;
        }
        let payload: IngestPayload = serde_json::from_value(value)
            .map_err(|e| ChunkError::InvalidPayload(format!("invalid payload: {}", e)))?;

        let meta = &payload.meta;
        if meta.tenant_id.trim().is_empty() || meta.namespace.trim().is_empty() {
            return Err(ChunkError::InvalidPayload(
                "meta tenant_id/namespace required".into(),
            ));
        }
        if meta.start.trim().is_empty() || meta.end.trim().is_empty() {
            return Err(ChunkError::InvalidPayload("meta start/end required".into()));
        }
        if payload.series.is_empty() {
            return Err(ChunkError::InvalidPayload("no series".into()));
        }

        debug!(series = payload.series.len(), bytes = data.len(), "Decoded payload");
        Ok((payload, warnings))
    }

    /// Store an already parsed payload; `warnings` are passed through sorted
    pub fn ingest_payload(
        &self,
        cancel: &CancellationToken,
        payload: IngestPayload,
        sink: &dyn Sink,
        object_key_prefix: &str,
        mut warnings: Vec<String>,
    ) -> Result<(ChunkRef, Vec<String>)> {
        let meta = payload.meta.normalized();
        for set in &payload.series {
            let key = set.key.normalized();
            if key.tenant_id != meta.tenant_id {
                return Err(ChunkError::InvalidPayload("series tenant mismatch".into()));
            }
            if key.namespace != meta.namespace {
                return Err(ChunkError::InvalidPayload("series namespace mismatch".into()));
            }
        }

        let writer = Writer::new(self.opts.writer.clone());
        for set in &payload.series {
            writer.add_series_points(&set.key, &set.points)?;
        }
        let chunk_ref = writer.flush(cancel, sink, &meta, object_key_prefix)?;

        warnings.sort();
        info!(
            tenant = %meta.tenant_id,
            namespace = %meta.namespace,
            object_key = %chunk_ref.object_key,
            points = chunk_ref.points,
            "Ingested payload"
        );
        Ok((chunk_ref, warnings))
    }
}

const PAYLOAD_FIELDS: &[&str] = &["meta", "series"];
const META_FIELDS: &[&str] = &[
    "tenant_id",
    "namespace",
    "source_id",
    "produced_at",
    "start",
    "end",
    "schema_version",
    "meta",
];
const SERIES_FIELDS: &[&str] = &["key", "points"];
const KEY_FIELDS: &[&str] = &[
    "tenant_id",
    "namespace",
    "metric",
    "entity_type",
    "entity_id",
    "tags",
];
const POINT_FIELDS: &[&str] = &["ts", "value", "meta"];

fn check_object(v: &Value, known: &[&str], at: &str) -> Result<()> {
    if let Value::Object(map) = v {
        if let Some(field) = map.keys().find(|k| !known.contains(&k.as_str())) {
            return Err(ChunkError::InvalidPayload(format!(
                "unknown field {:?} in {}",
                field, at
            )));
        }
    }
    Ok(())
}

fn check_known_fields(v: &Value) -> Result<()> {
    check_object(v, PAYLOAD_FIELDS, "payload")?;
    if let Some(meta) = v.get("meta") {
        check_object(meta, META_FIELDS, "meta")?;
    }
    let Some(Value::Array(series)) = v.get("series") else {
        return Ok(());
    };
    for (i, s) in series.iter().enumerate() {
        check_object(s, SERIES_FIELDS, &format!("series[{}]", i))?;
        if let Some(key) = s.get("key") {
            check_object(key, KEY_FIELDS, &format!("series[{}].key", i))?;
        }
        if let Some(Value::Array(points)) = s.get("points") {
            for (j, p) in points.iter().enumerate() {
                check_object(p, POINT_FIELDS, &format!("series[{}].points[{}]", i, j))?;
            }
        }
    }
    Ok(())
}
