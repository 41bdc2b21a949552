//! Volume and mount configuration carried in the image config.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A single block device mount, root or additional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// e.g. `/dev/vdb`.
    pub device: String,
    /// Mount point inside the guest, relative to `/rootfs` for the root
    /// volume or an absolute guest path for additional volumes.
    pub mount_point: String,
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub mount_options: Vec<String>,
}

fn default_fs_type() -> String {
    pkg_constants::vm::DEFAULT_ROOTFS_TYPE.to_string()
}

/// Root and additional volume mounts for a VM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mounts {
    pub root: Option<Volume>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Mounts {
    /// Validate structural invariants: devices are unique and non-empty,
    /// mount points are absolute and unique, and a root volume is present.
    pub fn validate(&self) -> Result<()> {
        let Some(root) = &self.root else {
            bail!("mounts.root is required");
        };
        if root.device.is_empty() {
            bail!("mounts.root.device must not be empty");
        }

        let mut seen_devices = std::collections::HashSet::new();
        let mut seen_mount_points = std::collections::HashSet::new();
        seen_devices.insert(root.device.clone());
        seen_mount_points.insert(root.mount_point.clone());

        for vol in &self.volumes {
            if vol.device.is_empty() {
                bail!("volume device must not be empty");
            }
            if !vol.mount_point.starts_with('/') {
                bail!(
                    "volume mount point '{}' must be an absolute path",
                    vol.mount_point
                );
            }
            if !seen_devices.insert(vol.device.clone()) {
                bail!("duplicate volume device '{}'", vol.device);
            }
            if !seen_mount_points.insert(vol.mount_point.clone()) {
                bail!("duplicate mount point '{}'", vol.mount_point);
            }
        }
        Ok(())
    }

    /// Device-mapper target name for an encrypted volume: the device path
    /// with `/dev/` stripped and remaining slashes replaced with `_`, plus
    /// a `_crypt` suffix.
    pub fn mapper_name(device: &str) -> String {
        let trimmed = device.strip_prefix("/dev/").unwrap_or(device);
        format!("{}_crypt", trimmed.replace('/', "_"))
    }
}

/// Optional guest user/group to create before the primary process starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub supplementary_groups: Vec<String>,
    #[serde(default)]
    pub create: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vol(device: &str, mount_point: &str) -> Volume {
        Volume {
            device: device.to_string(),
            mount_point: mount_point.to_string(),
            fs_type: "ext4".to_string(),
            encrypted: false,
            mount_options: vec![],
        }
    }

    #[test]
    fn root_required() {
        let mounts = Mounts::default();
        assert!(mounts.validate().is_err());
    }

    #[test]
    fn valid_mounts() {
        let mounts = Mounts {
            root: Some(vol("/dev/vda", "/")),
            volumes: vec![vol("/dev/vdb", "/data")],
        };
        assert!(mounts.validate().is_ok());
    }

    #[test]
    fn duplicate_device_rejected() {
        let mounts = Mounts {
            root: Some(vol("/dev/vda", "/")),
            volumes: vec![vol("/dev/vda", "/data")],
        };
        assert!(mounts.validate().is_err());
    }

    #[test]
    fn relative_mount_point_rejected() {
        let mounts = Mounts {
            root: Some(vol("/dev/vda", "/")),
            volumes: vec![vol("/dev/vdb", "data")],
        };
        assert!(mounts.validate().is_err());
    }

    #[test]
    fn mapper_name_strips_dev_and_replaces_slashes() {
        assert_eq!(Mounts::mapper_name("/dev/vdb"), "vdb_crypt");
        assert_eq!(Mounts::mapper_name("/dev/mapper/foo"), "mapper_foo_crypt");
    }
}
