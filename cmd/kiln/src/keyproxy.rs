//! Forwards `GET /v1/volume/key` requests to the KMS unix socket.
//!
//! Same shape as a pooled vsock HTTP connection over `AF_VSOCK`, here
//! pointed at a plain `AF_UNIX` socket instead of a vsock-multiplexed one:
//! a `tower::service_fn`-backed connector handed to `hyper_util`'s legacy
//! client.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper::{Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::UnixStream;
use tower::service_fn;

#[derive(Debug, thiserror::Error)]
pub enum KeyProxyError {
    #[error("KMS request failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),
    #[error("reading KMS response body: {0}")]
    Body(#[source] hyper::Error),
}

/// Wraps a `tokio::net::UnixStream` so it satisfies the
/// `hyper_util::client::legacy::connect::Connection` bound the legacy
/// client requires of its connector's output.
struct UnixIo(TokioIo<UnixStream>);

impl Connection for UnixIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl Read for UnixIo {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: ReadBufCursor<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl Write for UnixIo {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.0.is_write_vectored()
    }
}

fn unix_connector(path: PathBuf) -> impl tower::Service<
    Uri,
    Response = UnixIo,
    Error = std::io::Error,
    Future = Pin<Box<dyn std::future::Future<Output = std::io::Result<UnixIo>> + Send>>,
> + Clone {
    service_fn(move |_: Uri| {
        let path = path.clone();
        Box::pin(async move {
            let stream = UnixStream::connect(&path).await?;
            Ok(UnixIo(TokioIo::new(stream)))
        }) as Pin<Box<dyn std::future::Future<Output = std::io::Result<UnixIo>> + Send>>
    })
}

/// A one-shot client for proxying requests to the KMS over its unix
/// socket. Cheap to construct; a fresh connection is made per request,
/// matching the control protocol's "connections are not pooled" texture.
pub struct KeyProxyClient {
    socket_path: PathBuf,
}

impl KeyProxyClient {
    pub fn new(socket_path: PathBuf) -> Self {
        KeyProxyClient { socket_path }
    }

    /// Issue `GET <path>` against the KMS socket and return the raw
    /// status and response body for the caller to relay verbatim.
    pub async fn get(&self, path: &str) -> Result<(axum::http::StatusCode, Vec<u8>), KeyProxyError> {
        let connector = unix_connector(self.socket_path.clone());
        let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(connector);

        let request = Request::builder()
            .method("GET")
            .uri(format!("http://localhost{path}"))
            .body(Full::new(Bytes::new()))
            .expect("well-formed KMS proxy request");

        let response = client.request(request).await.map_err(KeyProxyError::Request)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(KeyProxyError::Body)?
            .to_bytes();
        Ok((status, body.to_vec()))
    }
}

/// Whether a KMS socket path is reachable, used at startup to warn (not
/// fail) when a VM declares volumes but no KMS socket was configured.
pub fn socket_exists(path: &Path) -> bool {
    path.exists()
}
