//! Guest-side AF_VSOCK transport: raw syscalls against CID 2 (host), the
//! same raw-libc idiom the guest-init binary itself uses for its own
//! mount/ioctl work. Deliberately blocking (not tokio-async) — this
//! mirrors the boot-time code it's paired with and is invoked from
//! `tokio::task::spawn_blocking` by callers that are otherwise async.

#![cfg(target_os = "linux")]

use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};

const AF_VSOCK: libc::sa_family_t = 40;
const VMADDR_CID_ANY: u32 = 0xffffffff;

/// Host CID, as seen from the guest.
pub const VMADDR_CID_HOST: u32 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct SockaddrVm {
    svm_family: libc::sa_family_t,
    svm_reserved1: u16,
    svm_port: u32,
    svm_cid: u32,
    svm_zero: [u8; 4],
}

fn sockaddr_vm(cid: u32, port: u32) -> SockaddrVm {
    SockaddrVm {
        svm_family: AF_VSOCK,
        svm_reserved1: 0,
        svm_port: port,
        svm_cid: cid,
        svm_zero: [0; 4],
    }
}

/// A connected AF_VSOCK stream, blocking `Read`/`Write`.
pub struct VsockStream {
    fd: OwnedFd,
}

impl VsockStream {
    pub fn as_raw_fd(&self) -> RawFd {
        use std::os::fd::AsRawFd;
        self.fd.as_raw_fd()
    }

    /// Release ownership of the underlying fd — used to hand a blocking
    /// `accept()`'d connection off to an async wrapper (e.g. `AsyncFd`)
    /// elsewhere in the guest binary.
    pub fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl Read for VsockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::fd::AsRawFd;
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl Write for VsockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::os::fd::AsRawFd;
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens an AF_VSOCK connection to the given CID/port. Failures surface
/// immediately — there is no retry policy at this layer.
pub struct GuestDialer;

impl GuestDialer {
    pub fn connect(cid: u32, port: u32) -> io::Result<VsockStream> {
        let fd = unsafe { libc::socket(AF_VSOCK as libc::c_int, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let addr = sockaddr_vm(cid, port);
        let ret = unsafe {
            use std::os::fd::AsRawFd;
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const SockaddrVm as *const libc::sockaddr,
                mem::size_of::<SockaddrVm>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(VsockStream { fd })
    }

    /// Convenience for the common case: dial the host.
    pub fn connect_host(port: u32) -> io::Result<VsockStream> {
        Self::connect(VMADDR_CID_HOST, port)
    }
}

/// A guest-side AF_VSOCK listener bound to `VMADDR_CID_ANY` on the given
/// port, accepting blocking connections from the host.
pub struct GuestListener {
    fd: OwnedFd,
}

impl GuestListener {
    pub fn bind(port: u32) -> io::Result<GuestListener> {
        let fd = unsafe { libc::socket(AF_VSOCK as libc::c_int, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let addr = sockaddr_vm(VMADDR_CID_ANY, port);
        let bind_ret = unsafe {
            use std::os::fd::AsRawFd;
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const SockaddrVm as *const libc::sockaddr,
                mem::size_of::<SockaddrVm>() as libc::socklen_t,
            )
        };
        if bind_ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let listen_ret = unsafe {
            use std::os::fd::AsRawFd;
            libc::listen(fd.as_raw_fd(), 16)
        };
        if listen_ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(GuestListener { fd })
    }

    pub fn accept(&self) -> io::Result<VsockStream> {
        use std::os::fd::AsRawFd;
        let client_fd =
            unsafe { libc::accept(self.fd.as_raw_fd(), std::ptr::null_mut(), std::ptr::null_mut()) };
        if client_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(client_fd) };
        Ok(VsockStream { fd })
    }

    pub fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}
