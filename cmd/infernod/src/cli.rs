use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "infernod", about = "Inferno host daemon")]
pub struct Cli {
    /// Unix socket to serve the `/run`/`/stop` API on.
    #[arg(long, default_value = "/var/run/inferno.sock")]
    pub socket_path: PathBuf,

    /// Base directory under which per-VM chroots are created.
    #[arg(long, default_value = "/var/lib/inferno/vms")]
    pub chroot_base: PathBuf,

    /// Guest kernel image copied into every chroot.
    #[arg(long)]
    pub kernel_path: PathBuf,

    /// Firecracker binary copied into every chroot.
    #[arg(long)]
    pub firecracker_path: PathBuf,

    /// Kiln binary copied into every chroot.
    #[arg(long)]
    pub kiln_path: PathBuf,

    /// Guest PID-1 binary packed into every initrd.
    #[arg(long)]
    pub init_path: PathBuf,

    /// Directory Kiln writes rotated guest log files into.
    #[arg(long, default_value = "/var/log/inferno")]
    pub log_dir: PathBuf,

    /// KMS unix socket, if volume encryption is in use.
    #[arg(long)]
    pub kms_socket_path: Option<PathBuf>,

    /// Log format: 'text' or 'json'.
    #[arg(long, default_value = "json")]
    pub log_format: String,
}
