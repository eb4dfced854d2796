//! tschunk CLI - inspect, verify and encode CHTS1 chunk blobs

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tschunk_core::{
    decode, ChunkMeta, ChunkRef, DecodedChunk, DecodedSeries, FsStore, IngestOptions, Ingestor,
    ReaderOptions, WriterOptions,
};

#[derive(Parser, Debug)]
#[command(name = "tschunk", version, about = "Work with CHTS1 time-series chunks")]
struct Cli {
    /// Accept NaN and infinite values
    #[arg(long, global = true, env = "TSCHUNK_ALLOW_NAN")]
    allow_nan: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a JSON summary of a chunk file
    Inspect {
        file: PathBuf,
        /// Include every decoded point
        #[arg(long)]
        points: bool,
    },
    /// Encode a JSON ingestion payload into a chunk under an output directory
    Encode {
        payload: PathBuf,
        /// Store root; the chunk lands at <out>/<tenant>/<key>
        #[arg(long)]
        out: PathBuf,
        /// Object key prefix
        #[arg(long, default_value = tschunk_core::config::DEFAULT_OBJECT_KEY_PREFIX)]
        prefix: String,
        /// Gzip the chunk body
        #[arg(long)]
        gzip: bool,
    },
    /// Check every checksum in a chunk file
    Verify { file: PathBuf },
}

#[derive(Serialize)]
struct SeriesSummary<'a> {
    key: String,
    points: usize,
    #[serde(skip_serializing_if = "str::is_empty")]
    start: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    end: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
enum SeriesView<'a> {
    Summary(SeriesSummary<'a>),
    Full(&'a DecodedSeries),
}

#[derive(Serialize)]
struct Inspection<'a> {
    meta: &'a ChunkMeta,
    chunk_ref: &'a ChunkRef,
    series: Vec<SeriesView<'a>>,
}

fn inspection(chunk: &DecodedChunk, with_points: bool) -> Inspection<'_> {
    let series = chunk
        .series
        .iter()
        .map(|s| {
            if with_points {
                SeriesView::Full(s)
            } else {
                SeriesView::Summary(SeriesSummary {
                    key: s.key.canonical(),
                    points: s.points.len(),
                    start: &s.start,
                    end: &s.end,
                })
            }
        })
        .collect();
    Inspection {
        meta: &chunk.meta,
        chunk_ref: &chunk.chunk_ref,
        series,
    }
}

fn read_chunk(path: &Path, opts: &ReaderOptions) -> anyhow::Result<DecodedChunk> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    debug!(bytes = data.len(), file = %path.display(), "Read chunk file");
    Ok(decode(&data, opts)?)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let reader = ReaderOptions {
        allow_nan: cli.allow_nan,
        ..Default::default()
    };

    match cli.command {
        Command::Inspect { file, points } => {
            let chunk = read_chunk(&file, &reader)?;
            let out = serde_json::to_string_pretty(&inspection(&chunk, points))?;
            println!("{}", out);
        }
        Command::Encode {
            payload,
            out,
            prefix,
            gzip,
        } => {
            let store = FsStore::open(&out)
                .with_context(|| format!("opening output dir {}", out.display()))?;
            let ingestor = Ingestor::new(IngestOptions {
                writer: WriterOptions {
                    compress_body: gzip,
                    allow_nan: cli.allow_nan,
                    ..Default::default()
                },
                ..Default::default()
            });
            let input = File::open(&payload)
                .with_context(|| format!("opening payload {}", payload.display()))?;
            let cancel = CancellationToken::new();
            let (chunk_ref, warnings) =
                ingestor.ingest(&cancel, BufReader::new(input), &store, &prefix)?;
            for w in &warnings {
                eprintln!("warning: {}", w);
            }
            println!("{}", serde_json::to_string_pretty(&chunk_ref)?);
        }
        Command::Verify { file } => {
            let chunk = read_chunk(&file, &reader)?;
            if chunk.chunk_ref.series != chunk.series.len() {
                bail!("series count mismatch");
            }
            println!(
                "OK {} series={} points={} sha256={}",
                file.display(),
                chunk.chunk_ref.series,
                chunk.chunk_ref.points,
                chunk.chunk_ref.sha256
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
