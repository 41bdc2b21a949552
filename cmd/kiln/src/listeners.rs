//! The three vsock control listeners (exit, log, key), each its own
//! `tokio::spawn`ed accept loop built on `pkg_vsock::HostListener` — one
//! long-lived task per role.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use pkg_logsink::LogSink;
use pkg_types::exit::ExitRecord;
use pkg_vsock::host::HostListener;

use crate::keyproxy::KeyProxyClient;

/// An `axum::serve`-compatible listener over an already-bound
/// `HostListener`. Each accepted connection serves exactly one logical
/// message, consistent with the control protocol's "connections are not
/// pooled" invariant; the listener itself keeps accepting indefinitely.
///
/// Holds an `Arc` rather than owning the `HostListener` outright so the
/// caller can retain its own handle and call `close()` on it once this
/// task is torn down during finalization.
pub struct UdsVsockListener {
    inner: Arc<HostListener>,
}

impl UdsVsockListener {
    pub fn new(inner: Arc<HostListener>) -> Self {
        UdsVsockListener { inner }
    }
}

impl axum::serve::Listener for UdsVsockListener {
    type Io = UnixStream;
    type Addr = ();

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok(stream) => return (stream, ()),
                Err(e) => {
                    tracing::warn!(error = %e, "vsock listener accept failed, retrying");
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(())
    }
}

/// Serve `POST /exit` on the exit vsock port, decoding the guest's exit
/// record and enqueueing it on `exit_tx`.
pub async fn serve_exit_listener(listener: Arc<HostListener>, exit_tx: mpsc::Sender<ExitRecord>) {
    let app = Router::new()
        .route("/exit", post(exit_handler))
        .with_state(exit_tx);
    if let Err(e) = axum::serve(UdsVsockListener::new(listener), app).await {
        tracing::error!(error = %e, "exit listener terminated");
    }
}

async fn exit_handler(
    State(exit_tx): State<mpsc::Sender<ExitRecord>>,
    Json(record): Json<ExitRecord>,
) -> StatusCode {
    match exit_tx.send(record).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Accept connections on the log vsock port; for each, read line-by-line
/// and forward non-empty, right-trimmed lines to the `LogSink`. Not an
/// HTTP surface — the control protocol here is a raw line stream.
pub async fn serve_log_listener(listener: Arc<HostListener>, sink: Arc<LogSink>) {
    loop {
        let stream = match listener.accept().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "log listener accept failed, retrying");
                continue;
            }
        };
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim_end();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if let Err(e) = sink.log(trimmed.to_string()).await {
                            tracing::warn!(error = %e, "writing guest log line");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "reading guest log connection");
                        break;
                    }
                }
            }
        });
    }
}

#[derive(Clone)]
struct KeyListenerState {
    volumes: Arc<HashMap<String, String>>,
    kms_socket_path: Option<PathBuf>,
}

#[derive(serde::Deserialize)]
struct KeyQuery {
    device: String,
}

/// Serve `GET /v1/volume/key?device=<dev>` on the key vsock port, proxying
/// to the KMS socket.
pub async fn serve_key_listener(
    listener: Arc<HostListener>,
    volumes: HashMap<String, String>,
    kms_socket_path: Option<PathBuf>,
) {
    let state = KeyListenerState {
        volumes: Arc::new(volumes),
        kms_socket_path,
    };
    let app = Router::new()
        .route("/v1/volume/key", get(key_handler))
        .with_state(state);
    if let Err(e) = axum::serve(UdsVsockListener::new(listener), app).await {
        tracing::error!(error = %e, "key listener terminated");
    }
}

async fn key_handler(State(state): State<KeyListenerState>, Query(query): Query<KeyQuery>) -> Response {
    let Some(volume_id) = state.volumes.get(&query.device) else {
        return (StatusCode::NOT_FOUND, format!("no volume mapping for device {}", query.device))
            .into_response();
    };
    let Some(kms_socket_path) = &state.kms_socket_path else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "KMS socket not configured".to_string())
            .into_response();
    };

    let path = format!("/v1/secret/data/inferno/volumes/{volume_id}/encryption-key");
    let client = KeyProxyClient::new(kms_socket_path.clone());
    match client.get(&path).await {
        Ok((status, body)) => Response::builder()
            .status(status)
            .body(axum::body::Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::warn!(error = %e, device = %query.device, "key proxy request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
