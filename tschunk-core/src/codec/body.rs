//! Chunk body encoding
//!
//! Layout (little-endian):
//!
//! ```text
//! SeriesCount      u32
//! per series:
//!   SeriesKeyLen   u32
//!   SeriesKeyJSON  canonical JSON
//!   PointsCount    u32
//!   BaseTS         i64   unix ns of the first point, 0 when empty
//!   per point:
//!     DeltaTS      signed varint, ns since previous point (0 for the first)
//!     Value        f64
//!   SeriesCRC32    u32   crc32(SeriesKeyJSON || point bytes), 0 when empty
//! BodyCRC32        u32   crc32(SeriesCount .. last SeriesCRC32)
//! ```

use super::cursor::Cursor;
use super::varint::{put_varint, read_varint, MAX_VARINT_LEN};
use crate::canonical::canonical_json;
use crate::series::SeriesBuf;
use crate::types::{SeriesKey, Timestamp};
use crate::{ChunkError, Result};
use bytes::{BufMut, BytesMut};

/// Counts of what was written into a body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyCounts {
    pub series: usize,
    pub points: usize,
}

/// Limits applied while decoding a body
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    pub max_series: usize,
    pub max_points: usize,
    pub allow_nan: bool,
}

/// One series as read back from a body
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub key: SeriesKey,
    pub points: Vec<(Timestamp, f64)>,
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| ChunkError::TooLarge(format!("too many {}", what)))
}

/// Encode sorted, deduplicated series into a body
pub fn encode_body(series: &[SeriesBuf]) -> Result<(BytesMut, BodyCounts)> {
    let capacity = 64 + series.iter().map(|s| s.points.len() * 10).sum::<usize>();
    let mut buf = BytesMut::with_capacity(capacity);
    let mut counts = BodyCounts::default();

    buf.put_u32_le(len_u32(series.len(), "series")?);

    for sb in series {
        let key_json = canonical_json(&sb.key.normalized())?;
        buf.put_u32_le(len_u32(key_json.len(), "series key bytes")?);
        buf.put_slice(&key_json);
        buf.put_u32_le(len_u32(sb.points.len(), "points")?);

        let Some(first) = sb.points.first() else {
            buf.put_i64_le(0);
            buf.put_u32_le(0);
            counts.series += 1;
            continue;
        };

        let base = first.ts;
        buf.put_i64_le(base);

        let block_start = buf.len();
        let mut prev = base;
        for p in &sb.points {
            // wrapping keeps the delta exact for any pair of i64 instants
            put_varint(&mut buf, p.ts.wrapping_sub(prev));
            buf.put_f64_le(p.value);
            prev = p.ts;
        }

        let mut crc = crc32fast::Hasher::new();
        crc.update(&key_json);
        crc.update(&buf[block_start..]);
        buf.put_u32_le(crc.finalize());

        counts.series += 1;
        counts.points += sb.points.len();
    }

    let body_crc = crc32fast::hash(&buf);
    buf.put_u32_le(body_crc);

    Ok((buf, counts))
}

/// Decode and CRC-verify a body
pub fn decode_body(body: &[u8], limits: &BodyLimits) -> Result<(Vec<RawSeries>, BodyCounts)> {
    if body.len() < 8 {
        return Err(ChunkError::InvalidFormat("body too small".into()));
    }

    let (covered, trailer) = body.split_at(body.len() - 4);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(covered);
    if expected != actual {
        return Err(ChunkError::ChecksumMismatch {
            section: "body",
            expected,
            actual,
        });
    }

    let mut cursor = Cursor::new(covered);
    let series_count = cursor.read_u32_le("series count")? as usize;
    if limits.max_series > 0 && series_count > limits.max_series {
        return Err(ChunkError::TooLarge(format!(
            "too many series ({}>{})",
            series_count, limits.max_series
        )));
    }

    let mut out = Vec::with_capacity(series_count.min(cursor.remaining() / 20));
    let mut total_points = 0usize;

    for _ in 0..series_count {
        let key_len = cursor.read_u32_le("series key length")? as usize;
        if key_len == 0 {
            return Err(ChunkError::InvalidFormat("empty series key".into()));
        }
        let key_json = cursor.read_slice(key_len, "series key")?;
        let key: SeriesKey = serde_json::from_slice(key_json)
            .map_err(|e| ChunkError::InvalidFormat(format!("series key json: {}", e)))?;
        let key = key.normalized();
        key.validate()
            .map_err(|e| ChunkError::InvalidFormat(format!("series key: {}", e)))?;

        let points_count = cursor.read_u32_le("points count")? as usize;
        total_points = total_points.saturating_add(points_count);
        if limits.max_points > 0 && total_points > limits.max_points {
            return Err(ChunkError::TooLarge(format!(
                "too many points ({}>{})",
                total_points, limits.max_points
            )));
        }
        let base = cursor.read_i64_le("base ts")?;

        let block_start = cursor.position();
        let mut points = Vec::with_capacity(points_count.min(cursor.remaining() / 9));
        let mut prev = base;
        for _ in 0..points_count {
            let window = cursor.peek(MAX_VARINT_LEN);
            let (delta, n) = read_varint(window)?;
            cursor.advance(n);
            let value = cursor.read_f64_le("point value")?;
            if !limits.allow_nan && !value.is_finite() {
                return Err(ChunkError::InvalidFormat("NaN/Inf not allowed".into()));
            }
            let ts = prev.wrapping_add(delta);
            points.push((ts, value));
            prev = ts;
        }
        let block_end = cursor.position();

        let expected = cursor.read_u32_le("series crc")?;
        let actual = if points_count == 0 {
            0
        } else {
            let mut crc = crc32fast::Hasher::new();
            crc.update(key_json);
            crc.update(&covered[block_start..block_end]);
            crc.finalize()
        };
        if expected != actual {
            return Err(ChunkError::ChecksumMismatch {
                section: "series",
                expected,
                actual,
            });
        }

        out.push(RawSeries { key, points });
    }

    if cursor.remaining() != 0 {
        return Err(ChunkError::InvalidFormat(format!(
            "{} trailing bytes in body",
            cursor.remaining()
        )));
    }

    let counts = BodyCounts {
        series: out.len(),
        points: total_points,
    };
    Ok((out, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::PointBuf;
    use std::collections::BTreeMap;

    fn limits() -> BodyLimits {
        BodyLimits {
            max_series: 100,
            max_points: 1_000,
            allow_nan: false,
        }
    }

    fn series(metric: &str, points: &[(i64, f64)]) -> SeriesBuf {
        SeriesBuf {
            key: SeriesKey::new("t1", "ns", metric, "host").with_tag("dc", "eu"),
            points: points
                .iter()
                .map(|&(ts, value)| PointBuf {
                    ts,
                    value,
                    meta: BTreeMap::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_exact_layout_single_point() {
        let sb = series("cpu", &[(1_000, 2.5)]);
        let (body, counts) = encode_body(std::slice::from_ref(&sb)).unwrap();
        assert_eq!(counts, BodyCounts { series: 1, points: 1 });

        let key_json = canonical_json(&sb.key).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&(key_json.len() as u32).to_le_bytes());
        expected.extend_from_slice(&key_json);
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&1_000i64.to_le_bytes());
        let point_start = expected.len();
        expected.push(0x00);
        expected.extend_from_slice(&2.5f64.to_le_bytes());
        let mut crc = crc32fast::Hasher::new();
        crc.update(&key_json);
        crc.update(&expected[point_start..]);
        expected.extend_from_slice(&crc.finalize().to_le_bytes());
        let body_crc = crc32fast::hash(&expected);
        expected.extend_from_slice(&body_crc.to_le_bytes());

        assert_eq!(&body[..], &expected[..]);
    }

    #[test]
    fn test_decode_reconstructs_absolute_timestamps() {
        let input = vec![
            series("cpu", &[(10, 1.0), (15, 2.0), (1_000_000_000_000, -3.5)]),
            series("mem", &[(-5, 0.0)]),
        ];
        let (body, _) = encode_body(&input).unwrap();
        let (decoded, counts) = decode_body(&body, &limits()).unwrap();

        assert_eq!(counts, BodyCounts { series: 2, points: 4 });
        assert_eq!(decoded[0].key, input[0].key);
        assert_eq!(
            decoded[0].points,
            vec![(10, 1.0), (15, 2.0), (1_000_000_000_000, -3.5)]
        );
        assert_eq!(decoded[1].points, vec![(-5, 0.0)]);
    }

    #[test]
    fn test_empty_series_encoding() {
        let (body, counts) = encode_body(&[series("idle", &[])]).unwrap();
        assert_eq!(counts, BodyCounts { series: 1, points: 0 });
        let (decoded, _) = decode_body(&body, &limits()).unwrap();
        assert!(decoded[0].points.is_empty());
    }

    #[test]
    fn test_every_byte_flip_detected() {
        let (body, _) = encode_body(&[series("cpu", &[(1, 1.0), (2, 2.0)])]).unwrap();
        for i in 0..body.len() {
            let mut corrupt = body.to_vec();
            corrupt[i] ^= 0x01;
            let err = decode_body(&corrupt, &limits()).unwrap_err();
            assert!(err.is_corruption(), "byte {} flip gave {:?}", i, err);
        }
    }

    #[test]
    fn test_series_crc_checked_independently() {
        let (body, _) = encode_body(&[series("cpu", &[(1, 1.0)])]).unwrap();
        let mut corrupt = body.to_vec();
        // flip the value byte, then re-seal the body crc so only the series crc can catch it
        let value_pos = corrupt.len() - 4 - 4 - 8;
        corrupt[value_pos] ^= 0xFF;
        let covered = corrupt.len() - 4;
        let resealed = crc32fast::hash(&corrupt[..covered]);
        corrupt[covered..].copy_from_slice(&resealed.to_le_bytes());

        let err = decode_body(&corrupt, &limits()).unwrap_err();
        assert!(matches!(err, ChunkError::ChecksumMismatch { section: "series", .. }));
    }

    #[test]
    fn test_limits_enforced() {
        let (body, _) = encode_body(&[series("a", &[(1, 1.0), (2, 2.0)]), series("b", &[(1, 1.0)])])
            .unwrap();
        let tight_series = BodyLimits { max_series: 1, ..limits() };
        assert!(matches!(decode_body(&body, &tight_series), Err(ChunkError::TooLarge(_))));
        let tight_points = BodyLimits { max_points: 2, ..limits() };
        assert!(matches!(decode_body(&body, &tight_points), Err(ChunkError::TooLarge(_))));
    }

    #[test]
    fn test_nan_policy_on_decode() {
        let (body, _) = encode_body(&[series("cpu", &[(1, f64::NAN)])]).unwrap();
        assert!(decode_body(&body, &limits()).is_err());
        let allow = BodyLimits { allow_nan: true, ..limits() };
        let (decoded, _) = decode_body(&body, &allow).unwrap();
        assert!(decoded[0].points[0].1.is_nan());
    }
}
