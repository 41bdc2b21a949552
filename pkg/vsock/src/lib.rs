//! Vsock transport abstractions shared by `inferno-init`, `kiln`, and
//! `infernod`: the host-side `<base>_<port>` UDS listener and
//! `CONNECT <port>\n` dialer, and the guest-side raw AF_VSOCK dialer and
//! listener.

pub mod error;
pub mod guest;
pub mod host;

pub use error::VsockError;
pub use host::{HostDialer, HostListener};

#[cfg(target_os = "linux")]
pub use guest::{GuestDialer, GuestListener, VsockStream};
