//! Boot steps 1-2 and 6-9: pseudo-filesystems, the rootfs mount, moving
//! `/dev` into the new root, and the standard `/dev` symlinks.
//!
//! Mount calls go through [`mount_one`], a common `(source, target,
//! fstype, flags, data)` shape covering the whole pseudo-fs table below.

use std::ffi::CString;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use nix::mount::{mount, MsFlags};

use pkg_types::volume::Volume;

fn mount_one(source: &str, target: &str, fstype: &str, flags: MsFlags, data: Option<&str>) -> Result<()> {
    fs::create_dir_all(target).with_context(|| format!("creating mount point {target}"))?;
    mount(Some(source), target, Some(fstype), flags, data)
        .with_context(|| format!("mounting {fstype} on {target}"))?;
    Ok(())
}

/// Step 1: `devtmpfs` on `/dev`, `NOSUID`.
pub fn mount_devtmpfs() -> Result<()> {
    mount_one("devtmpfs", "/dev", "devtmpfs", MsFlags::MS_NOSUID, None)
}

/// Step 2: `/proc` (RO) and `/sys` (NOSUID,NOEXEC,NODEV — device-mapper
/// needs `/sys`).
pub fn mount_early_pseudo_fs() -> Result<()> {
    mount_one("proc", "/proc", "proc", MsFlags::MS_RDONLY, None)?;
    mount_one(
        "sysfs",
        "/sys",
        "sysfs",
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None,
    )?;
    Ok(())
}

/// Step 6: mount the root volume on `/rootfs` with `relatime` plus any
/// image-supplied mount options, and prepare `/rootfs/dev` for the
/// subsequent `MS_MOVE`.
pub fn mount_rootfs(root: &Volume) -> Result<()> {
    fs::create_dir_all("/rootfs").context("creating /rootfs")?;

    let mut flags = MsFlags::MS_RELATIME;
    let mut extra_opts = Vec::new();
    for opt in &root.mount_options {
        match opt.as_str() {
            "ro" => flags |= MsFlags::MS_RDONLY,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            other => extra_opts.push(other.to_string()),
        }
    }
    let data = if extra_opts.is_empty() {
        None
    } else {
        Some(extra_opts.join(","))
    };

    mount(
        Some(root.device.as_str()),
        "/rootfs",
        Some(root.fs_type.as_str()),
        flags,
        data.as_deref(),
    )
    .with_context(|| format!("mounting root volume {} on /rootfs", root.device))?;

    fs::create_dir_all("/rootfs/dev").context("creating /rootfs/dev")?;
    Ok(())
}

/// Mount an additional (non-root) volume at its configured mount point
/// under the new root.
pub fn mount_additional_volume(vol: &Volume, device: &str) -> Result<()> {
    let target = format!("/rootfs{}", vol.mount_point);
    fs::create_dir_all(&target).with_context(|| format!("creating mount point {target}"))?;

    let mut flags = MsFlags::MS_RELATIME;
    let mut extra_opts = Vec::new();
    for opt in &vol.mount_options {
        match opt.as_str() {
            "ro" => flags |= MsFlags::MS_RDONLY,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            other => extra_opts.push(other.to_string()),
        }
    }
    let data = if extra_opts.is_empty() {
        None
    } else {
        Some(extra_opts.join(","))
    };

    mount(
        Some(device),
        target.as_str(),
        Some(vol.fs_type.as_str()),
        flags,
        data.as_deref(),
    )
    .with_context(|| format!("mounting volume {device} on {target}"))?;
    Ok(())
}

/// Step 7: move `/dev` into `/rootfs/dev` via `MS_MOVE`.
pub fn move_dev_into_rootfs() -> Result<()> {
    mount(
        Some("/dev"),
        "/rootfs/dev",
        None::<&str>,
        MsFlags::MS_MOVE,
        None::<&str>,
    )
    .context("moving /dev into /rootfs/dev")
}

/// Step 8: the pseudo-filesystems that only make sense inside the new root.
pub fn mount_late_pseudo_fs() -> Result<()> {
    let base = "/rootfs";
    mount_one(
        "devpts",
        &format!("{base}/dev/pts"),
        "devpts",
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_RELATIME,
        Some("mode=0620,gid=5,ptmxmode=666"),
    )?;
    mount_one(&format!("{base}/dev/mqueue"), &format!("{base}/dev/mqueue"), "mqueue", MsFlags::empty(), None)?;
    mount_one(
        "tmpfs",
        &format!("{base}/dev/shm"),
        "tmpfs",
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None,
    )?;
    mount_one(
        "hugetlbfs",
        &format!("{base}/dev/hugepages"),
        "hugetlbfs",
        MsFlags::MS_RELATIME,
        Some("pagesize=2M"),
    )?;
    mount_one(
        "tmpfs",
        &format!("{base}/sys/fs/cgroup"),
        "tmpfs",
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        Some("mode=755"),
    )?;
    Ok(())
}

/// Step 9: recreate `/dev/fd`, `/dev/stdin`, `/dev/stdout`, `/dev/stderr`,
/// removing any stale symlink left behind by devtmpfs first (idempotent
/// under a fresh namespace: re-running this tolerates prior runs).
pub fn create_dev_symlinks() -> Result<()> {
    let base = "/rootfs";
    let symlinks = [
        ("/proc/self/fd", "dev/fd"),
        ("/proc/self/fd/0", "dev/stdin"),
        ("/proc/self/fd/1", "dev/stdout"),
        ("/proc/self/fd/2", "dev/stderr"),
    ];
    for (src, dst) in symlinks {
        let dst_path = Path::new(base).join(dst);
        if dst_path.exists() || dst_path.symlink_metadata().is_ok() {
            let _ = fs::remove_file(&dst_path);
        }
        std::os::unix::fs::symlink(src, &dst_path)
            .with_context(|| format!("symlinking {}", dst_path.display()))?;
    }
    Ok(())
}

/// `chroot("/rootfs")` followed by `chdir("/")`, used once the new root is
/// fully assembled and it is time to hand off to the primary process.
pub fn pivot_into_rootfs() -> Result<()> {
    let c_root = CString::new("/rootfs").unwrap();
    let ret = unsafe { libc::chroot(c_root.as_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("chroot(/rootfs)");
    }
    std::env::set_current_dir("/").context("chdir(/) after chroot")?;
    Ok(())
}
