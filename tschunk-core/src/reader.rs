//! Chunk decoder
//!
//! The structural inverse of the writer: validates the header, parses and
//! validates the meta section, gunzips the body when flagged, and verifies
//! every series CRC and the body CRC before returning anything. There is no
//! partial decode; any corruption fails the whole blob.

use crate::codec::{self, BodyLimits, CONTENT_TYPE};
use crate::object_key::sha256_hex;
use crate::store::Source;
use crate::types::{format_timestamp, ChunkMeta, ChunkRef, SeriesKey};
use crate::{config, ChunkError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decoder limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Cap on blob, meta, body and decompressed body size (0 = default)
    pub max_bytes: usize,
    /// Cap on series count (0 = default)
    pub max_series: usize,
    /// Cap on total points (0 = default)
    pub max_points: usize,
    /// Accept NaN and infinite values
    pub allow_nan: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_bytes: config::READER_MAX_BYTES,
            max_series: config::READER_MAX_SERIES,
            max_points: config::READER_MAX_POINTS,
            allow_nan: false,
        }
    }
}

impl ReaderOptions {
    /// Replace zero limits with the defaults
    pub fn normalized(mut self) -> Self {
        if self.max_bytes == 0 {
            self.max_bytes = config::READER_MAX_BYTES;
        }
        if self.max_series == 0 {
            self.max_series = config::READER_MAX_SERIES;
        }
        if self.max_points == 0 {
            self.max_points = config::READER_MAX_POINTS;
        }
        self
    }
}

/// Decoded point with an RFC3339 UTC timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPoint {
    pub ts: String,
    pub value: f64,
}

/// Decoded series; `start`/`end` are its first and last timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedSeries {
    pub key: SeriesKey,
    pub points: Vec<DecodedPoint>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub end: String,
}

/// A fully decoded and verified chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedChunk {
    pub meta: ChunkMeta,
    pub series: Vec<DecodedSeries>,
    /// Computed from the bytes; `object_key` is empty unless fetched by key
    pub chunk_ref: ChunkRef,
}

/// Decode a CHTS1 blob
pub fn decode(data: &[u8], opts: &ReaderOptions) -> Result<DecodedChunk> {
    let o = opts.normalized();
    if data.len() > o.max_bytes {
        return Err(ChunkError::TooLarge(format!(
            "blob exceeds max bytes ({}>{})",
            data.len(),
            o.max_bytes
        )));
    }

    let (header, meta_json, raw_body) = codec::split_blob(data)?;
    if header.meta_len as usize > o.max_bytes {
        return Err(ChunkError::TooLarge("meta too large".into()));
    }

    let meta: ChunkMeta = serde_json::from_slice(meta_json)
        .map_err(|e| ChunkError::InvalidFormat(format!("meta json: {}", e)))?;
    let meta = meta.normalized();
    meta.validate()
        .map_err(|e| ChunkError::InvalidFormat(format!("meta: {}", e)))?;

    let inflated;
    let body = if header.gzip_body() {
        inflated = codec::gzip::decompress_canonical(raw_body, o.max_bytes)?;
        &inflated[..]
    } else {
        raw_body
    };

    let limits = BodyLimits {
        max_series: o.max_series,
        max_points: o.max_points,
        allow_nan: o.allow_nan,
    };
    let (raw_series, counts) = codec::decode_body(body, &limits)?;

    let mut series: Vec<DecodedSeries> = raw_series
        .into_iter()
        .map(|rs| {
            let points: Vec<DecodedPoint> = rs
                .points
                .iter()
                .map(|&(ts, value)| DecodedPoint {
                    ts: format_timestamp(ts),
                    value,
                })
                .collect();
            let start = points.first().map(|p| p.ts.clone()).unwrap_or_default();
            let end = points.last().map(|p| p.ts.clone()).unwrap_or_default();
            DecodedSeries {
                key: rs.key,
                points,
                start,
                end,
            }
        })
        .collect();
    series.sort_by_cached_key(|s| s.key.canonical());

    debug!(
        tenant = %meta.tenant_id,
        series = counts.series,
        points = counts.points,
        gzip = header.gzip_body(),
        "Decoded chunk"
    );

    let chunk_ref = ChunkRef {
        object_key: String::new(),
        content_type: CONTENT_TYPE.to_string(),
        bytes: data.len() as u64,
        sha256: sha256_hex(data),
        start: meta.start.clone(),
        end: meta.end.clone(),
        series: counts.series,
        points: counts.points,
    };

    Ok(DecodedChunk {
        meta,
        series,
        chunk_ref,
    })
}

/// Fetch a blob through `source` and decode it
pub fn decode_from(
    cancel: &CancellationToken,
    tenant_id: &str,
    object_key: &str,
    source: &dyn Source,
    opts: &ReaderOptions,
) -> Result<DecodedChunk> {
    let tenant_id = crate::canonical::normalize_string(tenant_id);
    let object_key = object_key.trim();
    if tenant_id.is_empty() || object_key.is_empty() {
        return Err(ChunkError::InvalidKey("tenant_id/object_key required".into()));
    }

    let obj = source
        .get(cancel, &tenant_id, object_key)
        .map_err(ChunkError::Source)?;
    let mut chunk = decode(&obj.data, opts)?;
    chunk.chunk_ref.object_key = object_key.to_string();
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Point;
    use crate::writer::{Writer, WriterOptions};

    fn write_chunk(compress: bool) -> (MemoryStore, ChunkRef) {
        let w = Writer::new(WriterOptions {
            compress_body: compress,
            ..Default::default()
        });
        let key = SeriesKey::new("t1", "ns", "cpu", "host").with_tag("dc", "eu");
        w.add_series_points(
            &key,
            &[
                Point::new("2026-01-01T00:00:01.25Z", 1.5),
                Point::new("2026-01-01T00:00:02Z", -2.0),
            ],
        )
        .unwrap();
        w.add_point(
            &SeriesKey::new("t1", "ns", "cpu", "app"),
            &Point::new("2026-01-01T00:00:03Z", 0.0),
        )
        .unwrap();
        let store = MemoryStore::new();
        let meta = ChunkMeta::new("t1", "ns", "2026-01-01T00:00:00Z", "2026-01-01T00:01:00Z");
        let r = w.flush(&CancellationToken::new(), &store, &meta, "").unwrap();
        (store, r)
    }

    #[test]
    fn test_round_trip_both_encodings() {
        for compress in [false, true] {
            let (store, r) = write_chunk(compress);
            let chunk = decode_from(
                &CancellationToken::new(),
                "t1",
                &r.object_key,
                &store,
                &ReaderOptions::default(),
            )
            .unwrap();

            assert_eq!(chunk.chunk_ref, r);
            assert_eq!(chunk.meta.schema_version, "v1");
            assert_eq!(chunk.series.len(), 2);
            // "t1|ns|cpu|app||" sorts before "t1|ns|cpu|host||dc=eu"
            assert_eq!(chunk.series[0].key.entity_type, "app");
            let host = &chunk.series[1];
            assert_eq!(host.key.tags["dc"], "eu");
            assert_eq!(host.start, "2026-01-01T00:00:01.250Z");
            assert_eq!(host.end, "2026-01-01T00:00:02Z");
            assert_eq!(host.points[0].value, 1.5);
            assert_eq!(host.points[1].value, -2.0);
        }
    }

    #[test]
    fn test_limits() {
        let (store, r) = write_chunk(true);
        let data = store.object("t1", &r.object_key).unwrap().data;

        let small = ReaderOptions {
            max_bytes: 16,
            ..Default::default()
        };
        assert!(matches!(decode(&data, &small), Err(ChunkError::TooLarge(_))));

        let few_series = ReaderOptions {
            max_series: 1,
            ..Default::default()
        };
        assert!(matches!(decode(&data, &few_series), Err(ChunkError::TooLarge(_))));

        let few_points = ReaderOptions {
            max_points: 2,
            ..Default::default()
        };
        assert!(matches!(decode(&data, &few_points), Err(ChunkError::TooLarge(_))));
    }

    #[test]
    fn test_invalid_meta_section() {
        let body = codec::encode_body(&[]).unwrap().0;
        let blob = codec::encode_blob(b"not json", 0, &body).unwrap();
        assert!(decode(&blob, &ReaderOptions::default()).unwrap_err().is_corruption());

        let no_window = br#"{"namespace":"ns","tenant_id":"t1","start":"","end":""}"#;
        let blob = codec::encode_blob(no_window, 0, &body).unwrap();
        assert!(decode(&blob, &ReaderOptions::default()).unwrap_err().is_corruption());
    }

    #[test]
    fn test_decode_from_errors() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let opts = ReaderOptions::default();
        assert!(matches!(
            decode_from(&cancel, " ", "ts/x.bin", &store, &opts),
            Err(ChunkError::InvalidKey(_))
        ));
        assert!(matches!(
            decode_from(&cancel, "t1", "ts/missing.bin", &store, &opts),
            Err(ChunkError::Source(_))
        ));
    }

    #[test]
    fn test_flag_bit_mismatch_is_corruption() {
        let (store, r) = write_chunk(false);
        let mut data = store.object("t1", &r.object_key).unwrap().data.to_vec();
        data[7] |= 0x01;
        let err = decode(&data, &ReaderOptions::default()).unwrap_err();
        assert!(err.is_corruption(), "{:?}", err);
    }
}
