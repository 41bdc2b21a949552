//! Vsock port assignments and guest networking defaults.

// ─── Vsock ports ────────────────────────────────────────────────────────────
//
// Each is a distinct `<control.sock>_<port>` host listener, per the chroot
// layout's `control.sock{,_10000..10003}` entries.

/// Guest log stream port (stdout/stderr lines forwarded to the LogSink).
pub const VSOCK_LOG_PORT: u32 = 10000;

/// Guest exit-record port (`POST /exit`).
pub const VSOCK_EXIT_PORT: u32 = 10001;

/// Volume key-proxy port (`GET /v1/volume/key`), opened only if the VM
/// declares at least one encrypted volume.
pub const VSOCK_KEY_PORT: u32 = 10002;

/// Guest control API port (signal relay, ping), dialed by the host.
pub const VSOCK_API_PORT: u32 = 10003;

// ─── Guest networking ───────────────────────────────────────────────────────

/// Name of the guest's primary network interface.
pub const GUEST_IFACE: &str = "eth0";

/// Name of the loopback interface every guest brings up.
pub const GUEST_LOOPBACK_IFACE: &str = "lo";

/// Default nameserver written to `/etc/resolv.conf` when none is configured.
pub const DEFAULT_NAMESERVER: &str = "8.8.8.8";
