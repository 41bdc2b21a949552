//! Infernod: the outermost host daemon. Accepts `/run`/`/stop` requests
//! over a unix socket, builds each VM's chroot, and spawns Kiln to own
//! the rest of that VM's life.

mod build;
mod cli;
mod error;
mod image;
mod logging;
mod routes;
mod state;

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::net::UnixListener;

use crate::cli::Cli;
use crate::image::DockerImageProvider;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_format);

    if let Err(e) = run(cli).await {
        tracing::error!(error = ?e, "infernod exiting with error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&cli.chroot_base).await?;

    let state = AppState {
        chroot_base: cli.chroot_base,
        kernel_path: cli.kernel_path,
        firecracker_path: cli.firecracker_path,
        kiln_path: cli.kiln_path,
        init_path: cli.init_path,
        log_dir: cli.log_dir,
        kms_socket_path: cli.kms_socket_path,
        image_provider: Arc::new(DockerImageProvider),
        vms: Arc::new(Mutex::new(HashMap::new())),
    };
    let app = routes::router(state);

    match std::fs::remove_file(&cli.socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let listener = UnixListener::bind(&cli.socket_path)?;
    std::fs::set_permissions(&cli.socket_path, std::fs::Permissions::from_mode(0o660))?;

    tracing::info!(socket = %cli.socket_path.display(), "infernod listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = std::fs::remove_file(&cli.socket_path);
    result.map_err(anyhow::Error::from)
}

async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing SIGTERM handler");
    let mut intr = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("installing SIGINT handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = intr.recv() => {}
    }
    tracing::info!("shutdown signal received");
}
