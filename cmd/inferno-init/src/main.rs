//! Guest PID 1 for Inferno microVMs.
//!
//! Mounts are gated to Linux since every syscall here is Linux-specific;
//! this binary still needs to parse on other host platforms for
//! workspace-wide `cargo check`, even though it is never run there.
#![cfg_attr(not(target_os = "linux"), allow(unused))]

#[macro_use]
mod log;

mod api;
mod files;
mod mount;
mod network;
mod supervise;
mod users;
mod volumes;
mod vsock_async;

use std::fs;

use anyhow::{Context, Result};

use pkg_types::config::ImageConfig;

const RUN_JSON_PATH: &str = "/inferno/run.json";

fn read_run_json() -> Result<ImageConfig> {
    let raw = fs::read_to_string(RUN_JSON_PATH).context("reading /inferno/run.json")?;
    let cfg: ImageConfig = serde_json::from_str(&raw).context("parsing /inferno/run.json")?;
    cfg.validate().context("validating image config")?;
    Ok(cfg)
}

fn set_hostname(id: &str) -> Result<()> {
    nix::unistd::sethostname(id).context("sethostname")
}

fn unlock_volumes(cfg: &ImageConfig) -> Result<()> {
    let key_port = pkg_constants::network::VSOCK_KEY_PORT;
    let Some(root) = &cfg.mounts.root else {
        anyhow::bail!("mounts.root is required");
    };
    if root.encrypted {
        volumes::unlock_volume(root, key_port).context("unlocking root volume")?;
    }
    for vol in &cfg.mounts.volumes {
        if vol.encrypted {
            volumes::unlock_volume(vol, key_port)
                .with_context(|| format!("unlocking volume {}", vol.device))?;
        }
    }
    Ok(())
}

fn mount_rootfs_and_volumes(cfg: &ImageConfig) -> Result<()> {
    let root = cfg.mounts.root.as_ref().context("mounts.root is required")?;
    let root_device = if root.encrypted {
        volumes::mapper_device_path(root)
    } else {
        root.device.clone()
    };
    let mut root_for_mount = root.clone();
    root_for_mount.device = root_device;
    mount::mount_rootfs(&root_for_mount)?;

    for vol in &cfg.mounts.volumes {
        let device = if vol.encrypted {
            volumes::mapper_device_path(vol)
        } else {
            vol.device.clone()
        };
        mount::mount_additional_volume(vol, &device)?;
    }
    Ok(())
}

fn set_primary_env(cfg: &ImageConfig) -> std::collections::HashMap<String, String> {
    let mut env = cfg.env.clone();
    env.entry("PATH".to_string())
        .or_insert_with(|| "/usr/local/bin:/usr/local/sbin:/usr/bin:/usr/sbin:/bin:/sbin".to_string());
    env
}

async fn boot() -> Result<()> {
    mount::mount_devtmpfs().context("mounting devtmpfs")?;
    mount::mount_early_pseudo_fs().context("mounting early pseudo-filesystems")?;

    let cfg = read_run_json()?;
    set_hostname(&cfg.id)?;

    unlock_volumes(&cfg)?;
    mount_rootfs_and_volumes(&cfg)?;
    mount::move_dev_into_rootfs().context("moving /dev into new root")?;
    mount::mount_late_pseudo_fs().context("mounting late pseudo-filesystems")?;
    mount::create_dev_symlinks().context("creating /dev symlinks")?;

    network::setup_networking(&cfg.ips).context("configuring networking")?;
    network::write_resolv_conf(&cfg.etc_resolv.nameservers).context("writing resolv.conf")?;
    network::write_etc_hosts(&cfg.etc_hosts).context("writing /etc/hosts")?;

    if let Some(user) = &cfg.user {
        users::create_user(user).context("creating user")?;
    }

    files::materialize_files(&cfg.files).context("materializing extra files")?;

    mount::pivot_into_rootfs().context("chrooting into /rootfs")?;

    let env = set_primary_env(&cfg);
    let mut child = supervise::spawn_primary(&cfg.process, &env).context("starting primary process")?;
    supervise::spawn_log_forwarders(&mut child, cfg.vsock.stdout);

    let (kill_tx, kill_rx) = tokio::sync::mpsc::channel(4);
    tokio::spawn(api::serve(cfg.vsock.api, kill_tx.clone()));

    log_info!("primary process started, entering supervision loop");
    let record = supervise::supervise(child, kill_tx, kill_rx).await;
    log_info!("primary process exited: {record:?}");

    supervise::report_exit(cfg.vsock.exit, &record)
        .await
        .context("reporting exit record")?;

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log_error!("building tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(boot()) {
        log_error!("boot failed: {e:#}");
        std::process::exit(1);
    }

    // Do not exit PID 1 explicitly — the VMM is stopped by Kiln.
    runtime.block_on(std::future::pending::<()>());
}
