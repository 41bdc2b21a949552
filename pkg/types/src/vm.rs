//! The host-side VM record and resource spec.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// CPU emulation flavor passed through to the VMM config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuKind {
    Host,
    T2,
    T2s,
    C3,
}

impl Default for CpuKind {
    fn default() -> Self {
        CpuKind::Host
    }
}

/// Resources allocated to a VM, shared between the VM record and the
/// VMM/Kiln configs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub vcpus: u32,
    pub memory_mib: u64,
    #[serde(default)]
    pub cpu_kind: CpuKind,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        ResourceSpec {
            vcpus: pkg_constants::vm::DEFAULT_CPU_COUNT,
            memory_mib: pkg_constants::vm::DEFAULT_MEMORY_MB,
            cpu_kind: CpuKind::default(),
        }
    }
}

/// Host-side record of a VM, created on `/run` and destroyed on finalize.
///
/// The id is never reused while its chroot directory exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub chroot_path: PathBuf,
    #[serde(default)]
    pub vmm_pid: Option<u32>,
    pub resources: ResourceSpec,
    pub log_socket_path: PathBuf,
}

impl VmRecord {
    pub fn new(id: String, chroot_path: PathBuf, resources: ResourceSpec) -> Self {
        let log_socket_path = chroot_path.join(pkg_constants::paths::CHROOT_CONTROL_SOCK);
        VmRecord {
            id,
            chroot_path,
            vmm_pid: None,
            resources,
            log_socket_path,
        }
    }
}
