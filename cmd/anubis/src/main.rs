//! Anubis: the embedded secret store's HTTP front-end. Vault-KV-v2-shaped
//! surface over a unix socket, owned by a separate daemon but consumed by
//! Kiln's key-proxy client.

mod cli;
mod error;
mod logging;
mod middleware;
mod routes;

use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UnixListener;

use pkg_kms::SecretStore;

use crate::cli::Cli;
use crate::routes::AppState;

/// Distinct from Kiln's own 5s HTTP-shutdown deadline.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_format);

    if let Err(e) = run(cli).await {
        tracing::error!(error = ?e, "anubis exiting with error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(SecretStore::open(&cli.db_path)?);
    let state = AppState {
        store,
        request_count: Arc::new(AtomicU64::new(0)),
    };
    let app = routes::router(state);

    match std::fs::remove_file(&cli.socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let listener = UnixListener::bind(&cli.socket_path)?;

    let mode = u32::from_str_radix(cli.socket_mode.trim_start_matches("0o"), 8)
        .unwrap_or(0o660);
    std::fs::set_permissions(&cli.socket_path, std::fs::Permissions::from_mode(mode))?;

    tracing::info!(socket = %cli.socket_path.display(), "anubis listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = std::fs::remove_file(&cli.socket_path);
    result.map_err(anyhow::Error::from)
}

/// Races graceful shutdown against a hard deadline: if `axum`'s own
/// drain doesn't finish within `SHUTDOWN_DEADLINE` after a signal, the
/// process exits anyway rather than hang on a stuck connection.
async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing SIGTERM handler");
    let mut intr = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("installing SIGINT handler");

    tokio::select! {
        _ = term.recv() => {}
        _ = intr.recv() => {}
    }
    tracing::info!("shutdown signal received, draining connections");

    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        tracing::warn!("graceful shutdown deadline elapsed, forcing exit");
        std::process::exit(0);
    });
}
