use std::net::SocketAddr;
use std::path::PathBuf;

use logfold_db::{Broker, ChunkDbConfig, Store, spawn_writer};

/// Server configuration parsed from environment variables.
///
/// # Environment Variables
///
/// | Variable                  | Required | Default      | Description                          |
/// |---------------------------|----------|--------------|--------------------------------------|
/// | `LOGFOLD_DATA`            | Yes      | --           | Directory holding the chunk database |
/// | `LOGFOLD_CHUNK_SIZE`      | No       | `268435456`  | Chunk body capacity in bytes         |
/// | `LOGFOLD_VERIFY_HASH`     | No       | `false`      | Verify chunk hashes at open          |
/// | `LOGFOLD_METRICS_LISTEN`  | No       | `[::]:2114`  | Prometheus `/metrics` address        |
/// | `LOGFOLD_BROKER_CAPACITY` | No       | `4096`       | Broadcast channel buffer size        |
#[derive(Debug, Clone, PartialEq)]
struct Config {
    /// Directory of the chunk database.
    data_dir: PathBuf,
    /// Chunk body capacity in bytes.
    chunk_size: u32,
    /// Whether to verify the content hash of every completed chunk at open.
    verify_hash: bool,
    /// Socket address the metrics endpoint listens on.
    metrics_addr: SocketAddr,
    /// Broadcast channel ring buffer capacity for live subscriptions.
    broker_capacity: usize,
}

/// Default chunk body capacity: 256 MB.
const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024 * 1024;

/// Default socket address for the Prometheus metrics endpoint.
const DEFAULT_METRICS_ADDR: &str = "[::]:2114";

/// Default broadcast channel capacity when `LOGFOLD_BROKER_CAPACITY` is not set.
const DEFAULT_BROKER_CAPACITY: usize = 4096;

impl Config {
    /// Parse server configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if `LOGFOLD_DATA` is not set or any optional
    /// variable fails to parse.
    fn from_env() -> Result<Config, String> {
        let data_dir = std::env::var("LOGFOLD_DATA")
            .map(PathBuf::from)
            .map_err(|_| "LOGFOLD_DATA environment variable is required".to_string())?;

        let chunk_size = match std::env::var("LOGFOLD_CHUNK_SIZE") {
            Ok(val) => val
                .parse::<u32>()
                .map_err(|e| format!("LOGFOLD_CHUNK_SIZE is not a valid u32: {e}"))?,
            Err(_) => DEFAULT_CHUNK_SIZE,
        };

        let verify_hash = match std::env::var("LOGFOLD_VERIFY_HASH") {
            Ok(val) => val
                .parse::<bool>()
                .map_err(|e| format!("LOGFOLD_VERIFY_HASH is not a valid bool: {e}"))?,
            Err(_) => false,
        };

        let metrics_addr = match std::env::var("LOGFOLD_METRICS_LISTEN") {
            Ok(val) => val
                .parse::<SocketAddr>()
                .map_err(|e| format!("LOGFOLD_METRICS_LISTEN is not a valid socket address: {e}"))?,
            Err(_) => DEFAULT_METRICS_ADDR
                .parse::<SocketAddr>()
                .expect("default metrics address is valid"),
        };

        let broker_capacity = match std::env::var("LOGFOLD_BROKER_CAPACITY") {
            Ok(val) => val
                .parse::<usize>()
                .map_err(|e| format!("LOGFOLD_BROKER_CAPACITY is not a valid usize: {e}"))?,
            Err(_) => DEFAULT_BROKER_CAPACITY,
        };

        Ok(Config {
            data_dir,
            chunk_size,
            verify_hash,
            metrics_addr,
            broker_capacity,
        })
    }
}

/// Initialize the global `tracing` subscriber with an `EnvFilter`.
///
/// Reads `RUST_LOG` for log level filtering, defaulting to `"info"`. Uses
/// `try_init()` so that repeated calls (e.g., across tests in one process)
/// do not panic -- the second call is a silent no-op.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Waits for a shutdown signal: SIGINT on all platforms, plus SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing and the metrics recorder.
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    tracing::info!(data_dir = %config.data_dir.display(), "Data directory");
    tracing::info!(chunk_size = config.chunk_size, "Chunk size");
    tracing::info!(verify_hash = config.verify_hash, "Hash verification");

    let metrics_handle = match logfold_db::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            logfold_db::metrics::get_installed_handle()
        }
    };

    // 2. Open (validate + recover) the store.
    let db_config = ChunkDbConfig::new(&config.data_dir, config.chunk_size)
        .with_verify_hash(config.verify_hash);
    let store = match Store::open(db_config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open store");
            std::process::exit(1);
        }
    };

    tracing::info!(
        streams = store.streams().len(),
        chunks = store.chunk_count(),
        epoch = store.epoch_number(),
        writer = store.writer_position(),
        "Store recovered"
    );

    // 3. Broker + writer task.
    let broker = Broker::new(config.broker_capacity);
    let (writer_handle, _read_index, join_handle) = spawn_writer(store, 64, broker);

    // 4. Metrics endpoint.
    if let Some(handle) = metrics_handle {
        logfold_db::metrics::serve_metrics(handle, config.metrics_addr);
    }

    // 5. Run until a shutdown signal, then drain the writer.
    shutdown_signal().await;

    tracing::info!("Shutting down");
    drop(writer_handle);
    join_handle
        .await
        .expect("writer task should exit without panicking");
}
