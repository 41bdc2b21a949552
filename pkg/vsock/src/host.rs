//! Host-side vsock transport: the `<base>_<port>` UDS listener the VMM
//! proxies AF_VSOCK connections through, and the `CONNECT <port>\n`
//! dialer used to reach a guest-side listener through `control.sock`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;

use crate::error::VsockError;

const DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum bytes read back from a single `HostDialer::connect` handshake
/// response line, guarding against a misbehaving peer holding the
/// connection open without ever sending `\n`.
const MAX_HANDSHAKE_LINE_BYTES: usize = 256;

/// A host-side vsock listener, bound at `<base>_<port>`.
///
/// Bind removes any pre-existing socket file first (a stale file from a
/// crashed previous run must not make the bind fail).
pub struct HostListener {
    inner: UnixListener,
    path: PathBuf,
}

impl HostListener {
    pub fn bind(base: &Path, port: u32) -> Result<HostListener, VsockError> {
        let mut path = base.to_path_buf();
        let mut file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(format!("_{port}"));
        path.set_file_name(file_name);

        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VsockError::Bind(e)),
        }

        let inner = UnixListener::bind(&path).map_err(VsockError::Bind)?;
        Ok(HostListener { inner, path })
    }

    pub async fn accept(&self) -> Result<UnixStream, VsockError> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent close: removes the socket file from disk so a later
    /// `bind` for the same port doesn't need to clean up after us. Takes
    /// `&self` rather than consuming, since finalizers only ever hold a
    /// shared handle to a listener whose accept loop is already running
    /// on another task; calling this more than once is harmless.
    pub fn close(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Dials a guest-side listener over the host's `control.sock` multiplexer.
pub struct HostDialer;

impl HostDialer {
    /// Connect to `<chroot>/control.sock`, perform the `CONNECT <port>\n`
    /// handshake, and return the raw stream for HTTP framing by the
    /// caller. Dial timeout is 1s; the handshake read is capped at 5s and
    /// at `MAX_HANDSHAKE_LINE_BYTES`.
    pub async fn connect(chroot: &Path, port: u32) -> Result<UnixStream, VsockError> {
        let sock_path = chroot.join(pkg_constants::paths::CHROOT_CONTROL_SOCK);
        let mut stream = timeout(DIAL_TIMEOUT, UnixStream::connect(&sock_path))
            .await
            .map_err(|_| VsockError::Timeout)??;

        timeout(
            IO_TIMEOUT,
            stream.write_all(format!("CONNECT {port}\n").as_bytes()),
        )
        .await
        .map_err(|_| VsockError::Timeout)??;

        let mut reader = BufReader::new(&mut stream).take(MAX_HANDSHAKE_LINE_BYTES as u64);
        let mut line = String::new();
        let n = timeout(IO_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| VsockError::Timeout)??;
        if n == 0 {
            return Err(VsockError::Handshake(
                "connection closed before handshake reply".to_string(),
            ));
        }

        let trimmed = line.trim_end();
        if !trimmed.starts_with("OK ") {
            return Err(VsockError::Handshake(format!(
                "unexpected handshake reply: {trimmed:?}"
            )));
        }
        // The `n` in "OK <n>" is the mux's own bookkeeping; the connect
        // path only needs to observe the state transition from
        // connected-to-mux to connected-to-port, not interpret it further.
        let _ = trimmed.trim_start_matches("OK ").parse::<u64>();

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn host_listener_path_has_port_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("control.sock");
        let listener = HostListener::bind(&base, 10001).unwrap();
        assert_eq!(
            listener.path(),
            dir.path().join("control.sock_10001").as_path()
        );
        listener.close();
    }

    #[tokio::test]
    async fn rebinding_after_stale_file_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("control.sock");
        let path = dir.path().join("control.sock_10001");
        std::fs::write(&path, b"stale").unwrap();
        let listener = HostListener::bind(&base, 10001).unwrap();
        listener.close();
    }

    #[tokio::test]
    async fn handshake_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let control_sock = dir.path().join(pkg_constants::paths::CHROOT_CONTROL_SOCK);
        let listener = UnixListener::bind(&control_sock).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"CONNECT 10001\n");
            stream.write_all(b"OK 1\n").await.unwrap();
        });

        let _stream = HostDialer::connect(dir.path(), 10001).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_bad_reply() {
        let dir = tempfile::tempdir().unwrap();
        let control_sock = dir.path().join(pkg_constants::paths::CHROOT_CONTROL_SOCK);
        let listener = UnixListener::bind(&control_sock).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"ERR nope\n").await.unwrap();
        });

        let result = HostDialer::connect(dir.path(), 10001).await;
        assert!(result.is_err());
        server.await.unwrap();
    }
}
