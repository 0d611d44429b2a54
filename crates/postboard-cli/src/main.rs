//! Postboard - terminal front end for the Postboard session layer.
//!
//! This binary is the composition root: it loads configuration, builds the
//! backend, owns the session store and drives the two-route shell from a
//! line-oriented prompt.

mod app;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use postboard_core::{ApiClient, AuthBackend, Config, InMemoryBackend};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

/// Log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "postboard.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to a daily file so they never interleave with prompts.
/// The returned guard flushes the writer when dropped.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let demo = args.iter().skip(1).any(|a| a == "--demo");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config ({}), using defaults", e);
            Config::default()
        }
    };

    let log_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./logs"));
    let _log_guard = init_tracing(&log_dir);
    info!(demo, "Postboard starting");

    let backend: Arc<dyn AuthBackend> = if demo {
        warn!("Running against the in-memory backend");
        Arc::new(InMemoryBackend::new())
    } else {
        Arc::new(ApiClient::from_config(&config).context("Failed to set up the backend client")?)
    };

    let mut app = App::new(backend, config, !demo);
    let result = app.run().await;

    if let Err(ref e) = result {
        eprintln!("Error: {}", e);
    }

    info!("Postboard shutting down");
    result
}
