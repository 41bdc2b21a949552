use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "kiln", about = "Inferno per-VM host-side supervisor")]
pub struct Cli {
    /// Path to the YAML Kiln config written by infernod.
    #[arg(long, short, default_value = "kiln.yaml")]
    pub config: PathBuf,

    /// Override the VM id from the config file.
    #[arg(long)]
    pub id: Option<String>,

    /// Override the vCPU count.
    #[arg(long)]
    pub cpu_count: Option<u32>,

    /// Override the memory size in MiB.
    #[arg(long)]
    pub memory_mb: Option<u64>,

    /// Override the uid the VMM process runs as.
    #[arg(long)]
    pub uid: Option<u32>,

    /// Override the gid the VMM process runs as.
    #[arg(long)]
    pub gid: Option<u32>,

    /// Path to the VMM (Firecracker) binary.
    #[arg(long, default_value = "firecracker")]
    pub vmm_path: PathBuf,

    /// Log format: 'text' or 'json'.
    #[arg(long, default_value = "json")]
    pub log_format: String,
}
