//! Write/read integration tests through the public API.

use tokio_util::sync::CancellationToken;
use tschunk_core::codec::BlobHeader;
use tschunk_core::object_key::sha256_hex;
use tschunk_core::{
    decode, decode_from, ChunkError, ChunkMeta, ChunkRef, FsStore, MemoryStore, Point,
    ReaderOptions, SeriesKey, Writer, WriterOptions,
};

fn meta() -> ChunkMeta {
    ChunkMeta::new("acme", "infra", "2026-01-01T00:00:00Z", "2026-01-01T01:00:00Z")
}

fn key(metric: &str, host: &str) -> SeriesKey {
    SeriesKey::new("acme", "infra", metric, "host")
        .with_entity_id(host)
        .with_tag("region", "eu-west")
}

fn fill(w: &Writer) {
    w.add_series_points(
        &key("cpu", "h1"),
        &[
            Point::new("2026-01-01T00:00:03Z", 0.75),
            Point::new("2026-01-01T00:00:01.250Z", 0.5),
            Point::new("2026-01-01T00:00:02Z", -1.0).with_meta("quality", "low"),
        ],
    )
    .unwrap();
    w.add_point(&key("mem", "h1"), &Point::new("2026-01-01T00:10:00Z", 1024.0))
        .unwrap();
    w.add_point(&key("cpu", "h2"), &Point::new("2026-01-01T00:00:00.000000001Z", 3.0))
        .unwrap();
}

fn flush_to(store: &MemoryStore, compress: bool) -> (ChunkRef, Vec<u8>) {
    let w = Writer::new(WriterOptions {
        compress_body: compress,
        ..Default::default()
    });
    fill(&w);
    let r = w
        .flush(&CancellationToken::new(), store, &meta(), "ts/acme/")
        .unwrap();
    let blob = store.object("acme", &r.object_key).unwrap().data.to_vec();
    (r, blob)
}

#[test]
fn test_roundtrip_both_encodings() {
    for compress in [false, true] {
        let store = MemoryStore::new();
        let (r, blob) = flush_to(&store, compress);
        assert_eq!(r.bytes as usize, blob.len());
        assert_eq!(r.sha256, sha256_hex(&blob));
        assert!(r.object_key.starts_with("ts/acme/tschunk_"));

        let chunk = decode(&blob, &ReaderOptions::default()).unwrap();
        assert_eq!(chunk.meta.tenant_id, "acme");
        assert_eq!(chunk.meta.schema_version, "v1");
        assert_eq!(chunk.chunk_ref.sha256, r.sha256);
        assert_eq!(chunk.chunk_ref.series, 3);
        assert_eq!(chunk.chunk_ref.points, 5);

        let keys: Vec<String> = chunk.series.iter().map(|s| s.key.canonical()).collect();
        assert_eq!(
            keys,
            vec![
                "acme|infra|cpu|host|h1|region=eu-west",
                "acme|infra|cpu|host|h2|region=eu-west",
                "acme|infra|mem|host|h1|region=eu-west",
            ]
        );

        let cpu = &chunk.series[0];
        let got: Vec<(&str, f64)> = cpu.points.iter().map(|p| (p.ts.as_str(), p.value)).collect();
        assert_eq!(
            got,
            vec![
                ("2026-01-01T00:00:01.250Z", 0.5),
                ("2026-01-01T00:00:02Z", -1.0),
                ("2026-01-01T00:00:03Z", 0.75),
            ]
        );
        assert_eq!(cpu.start, "2026-01-01T00:00:01.250Z");
        assert_eq!(cpu.end, "2026-01-01T00:00:03Z");
        assert_eq!(chunk.series[1].points[0].ts, "2026-01-01T00:00:00.000000001Z");
    }
}

#[test]
fn test_compressed_and_plain_differ_only_in_body() {
    let (plain_ref, plain) = flush_to(&MemoryStore::new(), false);
    let (gz_ref, gz) = flush_to(&MemoryStore::new(), true);
    assert_ne!(plain_ref.sha256, gz_ref.sha256);
    assert_eq!(plain[7], 0);
    assert_eq!(gz[7], 1);

    let a = decode(&plain, &ReaderOptions::default()).unwrap();
    let b = decode(&gz, &ReaderOptions::default()).unwrap();
    assert_eq!(a.series, b.series);
    assert_eq!(a.meta, b.meta);
}

#[test]
fn test_single_byte_flip_never_decodes() {
    for compress in [false, true] {
        let (_, blob) = flush_to(&MemoryStore::new(), compress);
        let meta_len = u32::from_le_bytes([blob[9], blob[10], blob[11], blob[12]]) as usize;
        let body_start = BlobHeader::SIZE + meta_len;

        let header = 0..BlobHeader::SIZE;
        let body = body_start..blob.len();
        for i in header.chain(body) {
            for mask in [0x01u8, 0x80, 0xff] {
                let mut corrupt = blob.clone();
                corrupt[i] ^= mask;
                let err = decode(&corrupt, &ReaderOptions::default()).expect_err(&format!(
                    "gzip={} flip at {} with mask {:#x} decoded",
                    compress, i, mask
                ));
                if i >= body_start {
                    assert!(
                        err.is_corruption() || matches!(err, ChunkError::TooLarge(_)),
                        "gzip={} unexpected error at {}: {}",
                        compress,
                        i,
                        err
                    );
                }
            }
        }
    }
}

#[test]
fn test_truncation_never_decodes() {
    for compress in [false, true] {
        let (_, blob) = flush_to(&MemoryStore::new(), compress);
        for len in 0..blob.len() {
            assert!(
                decode(&blob[..len], &ReaderOptions::default()).is_err(),
                "gzip={} len {}",
                compress,
                len
            );
        }
    }
}

#[test]
fn test_trailing_bytes_never_decode() {
    for compress in [false, true] {
        let (_, blob) = flush_to(&MemoryStore::new(), compress);
        for tail in [&b"\0"[..], &b"GARBAGE"[..]] {
            let mut padded = blob.clone();
            padded.extend_from_slice(tail);
            let err = decode(&padded, &ReaderOptions::default())
                .expect_err(&format!("gzip={} tail {:?} decoded", compress, tail));
            assert!(err.is_corruption(), "gzip={}: {}", compress, err);
        }
    }
}

#[test]
fn test_point_cap_keeps_series_key_order() {
    let w = Writer::new(WriterOptions {
        max_points_per_chunk: 4,
        ..Default::default()
    });
    for metric in ["b", "a"] {
        let points: Vec<Point> = (1..=3)
            .map(|s| Point::new(format!("2026-01-01T00:00:0{}Z", s), s as f64))
            .collect();
        w.add_series_points(&key(metric, "h1"), &points).unwrap();
    }
    let store = MemoryStore::new();
    let r = w
        .flush(&CancellationToken::new(), &store, &meta(), "")
        .unwrap();
    assert_eq!(r.points, 4);
    assert_eq!(r.series, 2);

    let blob = store.object("acme", &r.object_key).unwrap().data;
    let chunk = decode(&blob, &ReaderOptions::default()).unwrap();
    assert_eq!(chunk.series[0].key.metric, "a");
    assert_eq!(chunk.series[0].points.len(), 3);
    assert_eq!(chunk.series[1].key.metric, "b");
    assert_eq!(chunk.series[1].points.len(), 1);
    assert_eq!(chunk.series[1].points[0].ts, "2026-01-01T00:00:01Z");
    assert_eq!(
        chunk.meta.meta.get("writer_warning.001").map(String::as_str),
        Some("points_truncated:showing=4 of=6")
    );
}

#[test]
fn test_fs_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    let cancel = CancellationToken::new();

    let w = Writer::new(WriterOptions::default());
    fill(&w);
    let r = w.flush(&cancel, &store, &meta(), "ts").unwrap();
    assert!(store.object_path("acme", &r.object_key).unwrap().exists());

    let opts = ReaderOptions::default();
    let chunk = decode_from(&cancel, "acme", &r.object_key, &store, &opts).unwrap();
    assert_eq!(chunk.chunk_ref, r);

    let missing = decode_from(&cancel, "acme", "ts/nope.bin", &store, &opts);
    assert!(matches!(missing, Err(ChunkError::Source(_))));
}
