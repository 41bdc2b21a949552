//! Builds a VM's per-chroot working directory on `/run`: copies the
//! fixed binaries in, resolves the image, packs the initrd, creates the
//! rootfs, and writes the VMM/Kiln configs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pkg_constants::paths::{
    CHROOT_CONTROL_SOCK, CHROOT_EXIT_STATUS, CHROOT_FIRECRACKER, CHROOT_FIRECRACKER_CONFIG,
    CHROOT_INITRD, CHROOT_KERNEL, CHROOT_KILN, CHROOT_KILN_CONFIG, CHROOT_ROOTFS,
};
use pkg_types::config::{
    ImageConfig, KilnConfig, KilnVsockPorts, LogRotationPolicy, ProcessSpec, VsockPorts,
};
use pkg_types::validate::validate_vm_id;
use pkg_types::vm::{CpuKind, ResourceSpec, VmRecord};
use pkg_types::volume::{Mounts, Volume};

use crate::image::ImageManifest;

/// Default rootfs image size; the workload is expected to use an
/// additional volume for anything beyond its base image layers.
const ROOTFS_SIZE_BYTES: u64 = 512 * 1024 * 1024;

pub struct RunRequest {
    pub image: String,
    pub cpu_kind: CpuKind,
    pub cpu_count: Option<u32>,
    pub memory_mb: Option<u64>,
}

pub struct BuiltVm {
    pub record: VmRecord,
    pub kiln_config_path: PathBuf,
}

/// Generate an 8-hex-lowercase VM id, matching `validate_vm_id`'s shape.
pub fn generate_id() -> String {
    let id = nanoid::nanoid!(8, &nanoid::alphabet::HEXADECIMAL_LOWERCASE);
    debug_assert!(validate_vm_id(&id).is_ok());
    id
}

#[allow(clippy::too_many_arguments)]
pub async fn build_chroot(
    id: &str,
    request: &RunRequest,
    manifest: &ImageManifest,
    chroot_base: &Path,
    kernel_path: &Path,
    firecracker_path: &Path,
    kiln_path: &Path,
    init_path: &Path,
    log_dir: &Path,
    kms_socket_path: Option<PathBuf>,
) -> anyhow::Result<BuiltVm> {
    let chroot_dir = chroot_base.join(id);
    tokio::fs::create_dir_all(&chroot_dir).await?;
    tokio::fs::create_dir_all(log_dir).await?;

    std::fs::copy(kernel_path, chroot_dir.join(CHROOT_KERNEL))?;
    std::fs::copy(firecracker_path, chroot_dir.join(CHROOT_FIRECRACKER))?;
    std::fs::copy(kiln_path, chroot_dir.join(CHROOT_KILN))?;

    let resources = ResourceSpec {
        vcpus: request.cpu_count.unwrap_or(pkg_constants::vm::DEFAULT_CPU_COUNT),
        memory_mib: request.memory_mb.unwrap_or(pkg_constants::vm::DEFAULT_MEMORY_MB),
        cpu_kind: request.cpu_kind,
    };

    let process = build_process_spec(manifest)?;
    let mut env: HashMap<String, String> = manifest.env.clone();
    if let Some(workdir) = &manifest.workdir {
        env.entry("PWD".to_string()).or_insert_with(|| workdir.clone());
    }

    let image_config = ImageConfig {
        id: id.to_string(),
        process,
        env,
        ips: Vec::new(),
        log: Default::default(),
        mounts: Mounts {
            root: Some(Volume {
                device: "/dev/vda".to_string(),
                mount_point: "/".to_string(),
                fs_type: pkg_constants::vm::DEFAULT_ROOTFS_TYPE.to_string(),
                encrypted: false,
                mount_options: Vec::new(),
            }),
            volumes: Vec::new(),
        },
        user: None,
        files: Vec::new(),
        etc_resolv: Default::default(),
        etc_hosts: Vec::new(),
        vsock: VsockPorts::default(),
    };
    image_config.validate()?;

    let init_bytes = tokio::fs::read(init_path).await?;
    let run_json = serde_json::to_vec(&image_config)?;
    let initrd_bytes = pkg_initrd::pack_run_image(init_bytes, run_json)?;
    tokio::fs::write(chroot_dir.join(CHROOT_INITRD), &initrd_bytes).await?;

    let rootfs_path = chroot_dir.join(CHROOT_ROOTFS);
    build_rootfs(&rootfs_path).await?;

    let vmm_config_path = chroot_dir.join(CHROOT_FIRECRACKER_CONFIG);
    let vmm_socket_path = chroot_dir.join("firecracker.sock");
    write_firecracker_config(
        &vmm_config_path,
        &chroot_dir,
        &rootfs_path,
        id,
        &resources,
    )?;

    let kiln_config_path = chroot_dir.join(CHROOT_KILN_CONFIG);
    let kiln_config = KilnConfig {
        jail_id: id.to_string(),
        vmm_socket_path,
        vmm_config_path,
        vsock_base_path: chroot_dir.join(CHROOT_CONTROL_SOCK),
        vsock_ports: KilnVsockPorts::default(),
        exit_status_path: chroot_dir.join(CHROOT_EXIT_STATUS),
        log_dir: log_dir.to_path_buf(),
        log_rotation: LogRotationPolicy {
            max_size_mb: 100,
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        },
        resources,
        kms_socket_path,
        volumes: HashMap::new(),
    };
    let kiln_yaml = serde_yaml::to_string(&kiln_config)?;
    tokio::fs::write(&kiln_config_path, kiln_yaml).await?;

    let record = VmRecord::new(id.to_string(), chroot_dir, resources);

    Ok(BuiltVm {
        record,
        kiln_config_path,
    })
}

fn build_process_spec(manifest: &ImageManifest) -> anyhow::Result<ProcessSpec> {
    let mut argv: Vec<String> = manifest.entrypoint.clone();
    argv.extend(manifest.cmd.clone());
    let Some((cmd, args)) = argv.split_first() else {
        anyhow::bail!("image has no entrypoint or cmd to run");
    };
    Ok(ProcessSpec {
        cmd: cmd.clone(),
        args: args.to_vec(),
    })
}

async fn build_rootfs(path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    file.set_len(ROOTFS_SIZE_BYTES)?;
    drop(file);

    let output = tokio::process::Command::new("mkfs.ext4")
        .arg("-F")
        .arg(path)
        .output()
        .await?;
    if !output.status.success() {
        anyhow::bail!(
            "mkfs.ext4 {} failed: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

fn write_firecracker_config(
    path: &Path,
    chroot_dir: &Path,
    rootfs_path: &Path,
    id: &str,
    resources: &ResourceSpec,
) -> anyhow::Result<()> {
    let random_octets: [u8; 4] = rand::random();
    let mac = format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        pkg_constants::vm::GUEST_MAC_PREFIX[0],
        pkg_constants::vm::GUEST_MAC_PREFIX[1],
        random_octets[0],
        random_octets[1],
        random_octets[2],
        random_octets[3],
    );

    let config = serde_json::json!({
        "boot-source": {
            "kernel_image_path": chroot_dir.join(CHROOT_KERNEL),
            "initrd_path": chroot_dir.join(CHROOT_INITRD),
            "boot_args": pkg_constants::vm::DEFAULT_BOOT_ARGS,
        },
        "drives": [{
            "drive_id": "rootfs",
            "path_on_host": rootfs_path,
            "is_root_device": true,
            "is_read_only": false,
        }],
        "machine-config": {
            "vcpu_count": resources.vcpus,
            "mem_size_mib": resources.memory_mib,
        },
        "network-interfaces": [{
            "iface_id": pkg_constants::network::GUEST_IFACE,
            "guest_mac": mac,
            "host_dev_name": format!("tap_{id}"),
        }],
        "vsock": {
            "vsock_id": "1",
            "guest_cid": pkg_constants::vm::VSOCK_CID_GUEST,
            "uds_path": chroot_dir.join(CHROOT_CONTROL_SOCK),
        },
    });
    std::fs::write(path, serde_json::to_vec_pretty(&config)?)?;
    Ok(())
}
