use std::path::Path;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use pkg_types::vm::CpuKind;
use pkg_vsock::HostDialer;

use crate::build::{self, RunRequest};
use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/stop", post(stop_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RunBody {
    image: String,
    #[serde(default)]
    cpu_kind: CpuKind,
    #[serde(default)]
    cpu_count: Option<u32>,
    #[serde(default)]
    memory_mb: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    id: String,
}

async fn run_handler(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let manifest = state
        .image_provider
        .resolve(&body.image)
        .await
        .map_err(ApiError::internal)?;

    let id = build::generate_id();
    let request = RunRequest {
        image: body.image,
        cpu_kind: body.cpu_kind,
        cpu_count: body.cpu_count,
        memory_mb: body.memory_mb,
    };

    let built = build::build_chroot(
        &id,
        &request,
        &manifest,
        &state.chroot_base,
        &state.kernel_path,
        &state.firecracker_path,
        &state.kiln_path,
        &state.init_path,
        &state.log_dir,
        state.kms_socket_path.clone(),
    )
    .await
    .map_err(ApiError::internal)?;

    spawn_kiln(&state.kiln_path, &built.kiln_config_path).map_err(ApiError::internal)?;

    state
        .vms
        .lock()
        .unwrap()
        .insert(id.clone(), built.record);

    tracing::info!(vm_id = %id, "VM started");
    Ok((StatusCode::CREATED, Json(RunResponse { id })))
}

fn spawn_kiln(kiln_path: &Path, config_path: &Path) -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;

    std::process::Command::new(kiln_path)
        .arg("--config")
        .arg(config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StopBody {
    id: String,
    signal: i32,
}

async fn stop_handler(
    State(state): State<AppState>,
    Json(body): Json<StopBody>,
) -> Result<StatusCode, ApiError> {
    let chroot_path = {
        let vms = state.vms.lock().unwrap();
        vms.get(&body.id)
            .map(|record| record.chroot_path.clone())
            .ok_or_else(|| ApiError::not_found(format!("no such VM: {}", body.id)))?
    };

    signal_guest(&chroot_path, body.signal)
        .await
        .map_err(ApiError::internal)?;
    Ok(StatusCode::OK)
}

/// Dial the guest's control API over vsock and POST `/signal` with a
/// hand-rolled HTTP/1.1 request, the same wire shape the guest itself
/// uses to report its exit record.
async fn signal_guest(chroot: &Path, signal: i32) -> anyhow::Result<()> {
    let mut stream =
        HostDialer::connect(chroot, pkg_constants::network::VSOCK_API_PORT).await?;

    let body = serde_json::json!({ "signal": signal }).to_string();
    let request = format!(
        "POST /signal HTTP/1.1\r\n\
         Host: inferno\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    if !status_line.contains(" 200 ") && !status_line.contains(" 202 ") {
        anyhow::bail!("guest signal API returned: {}", status_line.trim());
    }
    Ok(())
}
