//! Filesystem path constants — the per-VM chroot layout and KMS defaults.

// ─── Per-VM chroot layout ──────────────────────────────────────────────────
//
// Every file below lives directly under a VM's chroot directory
// (`<chroot-base>/<vm-id>/`), created by the host daemon on `/run` and
// handed off to Kiln for the rest of the VM's life.

/// Guest kernel image copied into the chroot.
pub const CHROOT_KERNEL: &str = "vmlinux";

/// Firecracker binary copied into the chroot (jailer chroots into this dir).
pub const CHROOT_FIRECRACKER: &str = "firecracker";

/// Kiln binary copied into the chroot.
pub const CHROOT_KILN: &str = "kiln";

/// Ext4 rootfs image built for the guest.
pub const CHROOT_ROOTFS: &str = "rootfs.ext4";

/// Packed initrd (zstd-compressed cpio) carrying `/inferno/init` and `/inferno/run.json`.
pub const CHROOT_INITRD: &str = "initrd.img";

/// Firecracker VMM configuration file (JSON).
pub const CHROOT_FIRECRACKER_CONFIG: &str = "firecracker.json";

/// Kiln configuration file (YAML).
pub const CHROOT_KILN_CONFIG: &str = "kiln.json";

/// Kiln's own PID, written best-effort on startup.
pub const CHROOT_KILN_PID: &str = "kiln.pid";

/// Final merged exit record, written atomically by Kiln's finalizer.
pub const CHROOT_EXIT_STATUS: &str = "exit_status.json";

/// Base name of the vsock multiplexer UDS; per-port listeners append `_<port>`.
pub const CHROOT_CONTROL_SOCK: &str = "control.sock";

// ─── Initrd payload ─────────────────────────────────────────────────────────

/// Path of the init binary inside the initrd archive.
pub const INITRD_INIT_PATH: &str = "inferno/init";

/// Path of the serialized image config inside the initrd archive.
pub const INITRD_RUN_JSON_PATH: &str = "inferno/run.json";

/// cpio mode for `inferno/init` — must be executable.
pub const INITRD_INIT_MODE: u32 = 0o755;

/// cpio mode for `inferno/run.json`.
pub const INITRD_RUN_JSON_MODE: u32 = 0o644;

// ─── KMS ─────────────────────────────────────────────────────────────────

/// Default KMS socket path.
pub const DEFAULT_ANUBIS_SOCKET_PATH: &str = "/var/lib/anubis/anubis.sock";

/// Default KMS sqlite database path.
pub const DEFAULT_ANUBIS_DB_PATH: &str = "/var/lib/anubis/anubis.db";

/// Default mode bits for the KMS unix socket.
pub const DEFAULT_ANUBIS_SOCKET_MODE: u32 = 0o660;

/// Secret path prefix under which per-volume LUKS keys are stored.
pub const VOLUME_SECRET_PREFIX: &str = "inferno/volumes";

/// Secret data field name holding the base64-encoded LUKS key.
pub const VOLUME_SECRET_KEY_FIELD: &str = "key";

// ─── Host daemon ────────────────────────────────────────────────────────────

/// Default host daemon unix socket path.
pub const DEFAULT_INFERNOD_SOCKET_PATH: &str = "/var/run/inferno.sock";

/// Default base directory under which per-VM chroots are created.
pub const DEFAULT_CHROOT_BASE: &str = "/var/lib/inferno/vms";

/// Default directory Kiln writes rotated guest log files into.
pub const DEFAULT_LOG_DIR: &str = "/var/log/inferno";
