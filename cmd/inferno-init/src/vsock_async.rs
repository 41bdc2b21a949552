//! Bridges the blocking `pkg_vsock::guest` transport into something
//! `axum::serve` can drive, the way the guest API listener (step 15) needs.
//!
//! `pkg_vsock::guest::{GuestListener, VsockStream}` are deliberately
//! blocking, mirroring the rest of this binary's boot-time code. Once the
//! primary process is running and the supervision loop needs an async HTTP
//! surface for signal delivery and pings, the raw fd is wrapped in a
//! `tokio::io::unix::AsyncFd` the same way the vsock-over-hyper reference
//! extension trait wraps its own stream for `hyper::client::conn`.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use pkg_vsock::guest::GuestListener;

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// An accepted AF_VSOCK connection, async `Read`/`Write` via `AsyncFd`.
pub struct AsyncVsockStream {
    inner: AsyncFd<OwnedFd>,
}

impl AsyncVsockStream {
    /// Takes ownership of a raw fd from a blocking `accept()`, switching it
    /// to non-blocking mode before wrapping it.
    pub fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        set_nonblocking(fd)?;
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(AsyncVsockStream {
            inner: AsyncFd::new(owned)?,
        })
    }
}

impl AsyncRead for AsyncVsockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            let mut guard = match this.inner.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };

            let fd = this.inner.get_ref().as_raw_fd();
            let unfilled = buf.initialize_unfilled();
            let result = unsafe {
                libc::read(fd, unfilled.as_mut_ptr() as *mut libc::c_void, unfilled.len())
            };
            if result < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    guard.clear_ready();
                    continue;
                }
                return Poll::Ready(Err(err));
            }
            buf.advance(result as usize);
            return Poll::Ready(Ok(()));
        }
    }
}

impl AsyncWrite for AsyncVsockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            let mut guard = match this.inner.poll_write_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };

            let fd = this.inner.get_ref().as_raw_fd();
            let result = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
            if result < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    guard.clear_ready();
                    continue;
                }
                return Poll::Ready(Err(err));
            }
            return Poll::Ready(Ok(result as usize));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// An `axum::serve`-compatible listener over a guest-side vsock port.
/// `accept()` bridges the blocking `GuestListener::accept` via
/// `spawn_blocking`, since the underlying libc `accept(2)` call has no
/// async-aware equivalent in `pkg_vsock::guest`.
pub struct AsyncVsockListener {
    inner: Arc<GuestListener>,
    port: u32,
}

impl AsyncVsockListener {
    pub fn bind(port: u32) -> io::Result<Self> {
        let inner = GuestListener::bind(port)?;
        Ok(AsyncVsockListener {
            inner: Arc::new(inner),
            port,
        })
    }
}

impl axum::serve::Listener for AsyncVsockListener {
    type Io = AsyncVsockStream;
    type Addr = u32;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let listener = Arc::clone(&self.inner);
            let result = tokio::task::spawn_blocking(move || listener.accept()).await;
            match result {
                Ok(Ok(stream)) => {
                    let fd = stream.into_raw_fd();
                    match AsyncVsockStream::from_raw_fd(fd) {
                        Ok(async_stream) => return (async_stream, self.port),
                        Err(_) => continue,
                    }
                }
                Ok(Err(_)) | Err(_) => continue,
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.port)
    }
}
