//! `ImageConfig` (the `run.json` embedded in the initrd) and `KilnConfig`
//! (Kiln's own startup configuration), plus the YAML-config-file loader
//! shared by every binary in the workspace.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::volume::{Mounts, UserConfig};

/// The primary process a VM runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A single guest IP assignment on `eth0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpConfig {
    pub ip: String,
    pub gateway: String,
    pub prefix: u8,
}

/// Guest-side logging knobs carried in the image config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub level: Option<String>,
}

/// A single extra file materialized into the guest filesystem before the
/// primary process starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraFile {
    pub path: String,
    pub mode: u32,
    /// Base64-encoded file content.
    pub content: String,
}

/// Nameservers written into `/etc/resolv.conf`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvConfig {
    #[serde(default)]
    pub nameservers: Vec<String>,
}

/// A single `/etc/hosts` entry beyond the six default ones init always
/// writes (IPv4/IPv6 localhost plus the four ip6 multicast/router entries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsEntry {
    pub ip: String,
    pub hostnames: Vec<String>,
}

/// Vsock ports the guest side of a VM listens on / dials, as assigned by
/// the host daemon when it writes `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VsockPorts {
    pub stdout: u32,
    pub exit: u32,
    pub api: u32,
}

impl Default for VsockPorts {
    fn default() -> Self {
        VsockPorts {
            stdout: pkg_constants::network::VSOCK_LOG_PORT,
            exit: pkg_constants::network::VSOCK_EXIT_PORT,
            api: pkg_constants::network::VSOCK_API_PORT,
        }
    }
}

/// The image config carried into the guest via initrd as `/inferno/run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub id: String,
    pub process: ProcessSpec,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    #[serde(default)]
    pub log: LogSettings,
    pub mounts: Mounts,
    #[serde(default)]
    pub user: Option<UserConfig>,
    #[serde(default)]
    pub files: Vec<ExtraFile>,
    #[serde(default)]
    pub etc_resolv: ResolvConfig,
    #[serde(default)]
    pub etc_hosts: Vec<HostsEntry>,
    #[serde(default)]
    pub vsock: VsockPorts,
}

impl ImageConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.mounts.validate()
    }
}

/// Per-VM vsock ports Kiln opens host-side listeners on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnVsockPorts {
    pub stdout: u32,
    pub exit: u32,
    pub key: u32,
}

impl Default for KilnVsockPorts {
    fn default() -> Self {
        KilnVsockPorts {
            stdout: pkg_constants::network::VSOCK_LOG_PORT,
            exit: pkg_constants::network::VSOCK_EXIT_PORT,
            key: pkg_constants::network::VSOCK_KEY_PORT,
        }
    }
}

/// Log rotation policy applied by `pkg-logsink`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRotationPolicy {
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_compress")]
    pub compress: bool,
}

fn default_max_size_mb() -> u64 {
    100
}
fn default_max_backups() -> u32 {
    3
}
fn default_max_age_days() -> u32 {
    7
}
fn default_compress() -> bool {
    true
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        LogRotationPolicy {
            max_size_mb: default_max_size_mb(),
            max_backups: default_max_backups(),
            max_age_days: default_max_age_days(),
            compress: default_compress(),
        }
    }
}

/// Kiln's own startup configuration, written by the host daemon next to
/// the VMM config in the VM's chroot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    pub jail_id: String,
    pub vmm_socket_path: PathBuf,
    pub vmm_config_path: PathBuf,
    pub vsock_base_path: PathBuf,
    #[serde(default)]
    pub vsock_ports: KilnVsockPorts,
    pub exit_status_path: PathBuf,
    pub log_dir: PathBuf,
    #[serde(default)]
    pub log_rotation: LogRotationPolicy,
    pub resources: crate::vm::ResourceSpec,
    #[serde(default)]
    pub kms_socket_path: Option<PathBuf>,
    /// device → volume-id, consumed by the key proxy.
    #[serde(default)]
    pub volumes: HashMap<String, String>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(
    path: &std::path::Path,
) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_config_round_trips_through_json() {
        let cfg = ImageConfig {
            id: "deadbeef".to_string(),
            process: ProcessSpec {
                cmd: "/usr/bin/app".to_string(),
                args: vec!["--flag".to_string()],
            },
            env: HashMap::new(),
            ips: vec![],
            log: LogSettings::default(),
            mounts: Mounts {
                root: Some(crate::volume::Volume {
                    device: "/dev/vda".to_string(),
                    mount_point: "/".to_string(),
                    fs_type: "ext4".to_string(),
                    encrypted: false,
                    mount_options: vec![],
                }),
                volumes: vec![],
            },
            user: None,
            files: vec![],
            etc_resolv: ResolvConfig::default(),
            etc_hosts: vec![],
            vsock: VsockPorts::default(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ImageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, cfg.id);
        assert!(back.validate().is_ok());
    }

    #[test]
    fn missing_config_file_yields_default() {
        let loaded: KilnVsockPorts =
            load_config_file(std::path::Path::new("/nonexistent/path/kiln.yaml")).unwrap();
        assert_eq!(loaded.stdout, KilnVsockPorts::default().stdout);
    }
}
