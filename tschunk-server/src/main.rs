//! tschunk server - HTTP API for encoding, decoding and compacting chunks

mod api;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tschunk_core::{FsStore, IngestOptions, Ingestor, ReaderOptions, WriterOptions};

/// Server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "tschunk-server", version, about = "tschunk HTTP server")]
pub struct ServerConfig {
    /// HTTP listen address
    #[arg(long, env = "TSCHUNK_LISTEN", default_value = "0.0.0.0:8086")]
    pub listen: SocketAddr,

    /// Directory chunks are stored under
    #[arg(long, env = "TSCHUNK_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Gzip chunk bodies
    #[arg(long, env = "TSCHUNK_COMPRESS_BODY")]
    pub compress_body: bool,

    /// Points per chunk (0 = default)
    #[arg(long, env = "TSCHUNK_MAX_POINTS_PER_CHUNK", default_value_t = 0)]
    pub max_points_per_chunk: usize,

    /// Series per chunk (0 = default)
    #[arg(long, env = "TSCHUNK_MAX_SERIES_PER_CHUNK", default_value_t = 0)]
    pub max_series_per_chunk: usize,

    /// Accept NaN and infinite values
    #[arg(long, env = "TSCHUNK_ALLOW_NAN")]
    pub allow_nan: bool,

    /// Request body limit in bytes
    #[arg(
        long,
        env = "TSCHUNK_MAX_BODY_BYTES",
        default_value_t = tschunk_core::config::INGEST_MAX_BYTES
    )]
    pub max_body_bytes: usize,

    /// Emit JSON log lines
    #[arg(long, env = "TSCHUNK_LOG_JSON")]
    pub log_json: bool,
}

impl ServerConfig {
    fn app_state(&self) -> anyhow::Result<api::AppState> {
        let store = Arc::new(
            FsStore::open(&self.data_dir)
                .with_context(|| format!("opening data dir {}", self.data_dir.display()))?,
        );
        let ingestor = Ingestor::new(IngestOptions {
            max_bytes: self.max_body_bytes,
            writer: WriterOptions {
                compress_body: self.compress_body,
                max_points_per_chunk: self.max_points_per_chunk,
                max_series_per_chunk: self.max_series_per_chunk,
                allow_nan: self.allow_nan,
            },
            ..Default::default()
        });
        Ok(api::AppState {
            sink: store.clone(),
            source: store,
            ingestor,
            reader: ReaderOptions {
                allow_nan: self.allow_nan,
                ..Default::default()
            },
            max_body_bytes: self.max_body_bytes,
        })
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_tracing(config.log_json);

    info!("Starting tschunk server...");
    info!("Data directory: {:?}", config.data_dir);

    let app = api::create_router(config.app_state()?);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("tschunk server listening on {}", config.listen);

    axum::serve(listener, app).await?;

    Ok(())
}
