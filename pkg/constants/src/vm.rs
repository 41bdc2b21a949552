//! Virtual machine / vsock CID constants and boot defaults.

/// vsock context id reserved for the host.
pub const VSOCK_CID_HOST: u32 = 2;

/// vsock context id assigned to every guest.
pub const VSOCK_CID_GUEST: u32 = 3;

/// Kernel command line every guest boots with.
///
/// `rdinit=/inferno/init` hands control straight to the unpacked initrd
/// binary as PID 1, bypassing any on-disk init system.
pub const DEFAULT_BOOT_ARGS: &str =
    "console=ttyS0 reboot=k panic=1 pci=off rdinit=/inferno/init";

/// Default vCPU count for a freshly created VM.
pub const DEFAULT_CPU_COUNT: u32 = 1;

/// Default memory size in MiB for a freshly created VM.
pub const DEFAULT_MEMORY_MB: u64 = 512;

/// Locally-administered MAC address prefix assigned to `eth0`; the low
/// three octets are randomized per VM.
pub const GUEST_MAC_PREFIX: [u8; 3] = [0xAB, 0xCD, 0x00];

/// Default ext4 filesystem type used for the root volume.
pub const DEFAULT_ROOTFS_TYPE: &str = "ext4";

/// Window within which a `Killed process <pid>` line in `/dev/kmsg` is
/// attributed to the primary process's own exit (see pkg-types::ExitRecord
/// OOM detection).
pub const OOM_SCAN_DEADLINE_SECS: u64 = 2;
