//! Kiln: the per-VM host-side supervisor. Launches the VMM, owns the
//! vsock control listeners, streams guest logs, proxies key requests to
//! the secret store, relays signals, and finalizes with a precise exit
//! record.

mod cli;
mod finalize;
mod keyproxy;
mod listeners;
mod logging;
mod vmm;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use pkg_types::config::{load_config_file, KilnConfig};
use pkg_types::exit::{merge, ExitRecord, KilnExitStatus, KilnPartial};
use pkg_vsock::HostListener;

use crate::keyproxy::socket_exists;

use crate::cli::Cli;
use crate::finalize::Finalizers;
use crate::vmm::VmmProcess;

/// Graceful-shutdown deadline for the three HTTP/line listeners, named
/// explicitly in the control-surface design note (distinct from Anubis's
/// own 10s deadline).
const LISTENER_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

enum KilnEvent {
    HostSignal(Signal),
    GuestExit(ExitRecord),
    VmmDone(std::io::Result<std::process::ExitStatus>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_format);

    if let Err(e) = run(cli).await {
        tracing::error!(error = ?e, "kiln exiting with error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config: KilnConfig = load_config_file(&cli.config)?;
    if let Some(id) = cli.id {
        config.jail_id = id;
    }
    if let Some(cpu_count) = cli.cpu_count {
        config.resources.vcpus = cpu_count;
    }
    if let Some(memory_mb) = cli.memory_mb {
        config.resources.memory_mib = memory_mb;
    }

    let chroot_dir = config
        .exit_status_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    write_pid_file(&chroot_dir);

    tracing::info!(jail_id = %config.jail_id, "kiln starting");

    let mut vmm = VmmProcess::spawn(
        &cli.vmm_path,
        &config.jail_id,
        &config.vmm_socket_path,
        &config.vmm_config_path,
        cli.uid,
        cli.gid,
    )?;
    vmm.spawn_log_forwarders();

    let log_sink = std::sync::Arc::new(pkg_logsink::LogSink::new(
        config.log_dir.join(format!("{}.log", config.jail_id)),
        config.log_rotation.clone(),
    )?);

    let exit_listener = Arc::new(HostListener::bind(
        &config.vsock_base_path,
        config.vsock_ports.exit,
    )?);
    let log_listener = Arc::new(HostListener::bind(
        &config.vsock_base_path,
        config.vsock_ports.stdout,
    )?);

    // §4.4 Setup: the key listener is only opened if the VM declares any
    // encrypted volumes.
    let has_volumes = !config.volumes.is_empty();
    let key_listener = if has_volumes {
        Some(Arc::new(HostListener::bind(
            &config.vsock_base_path,
            config.vsock_ports.key,
        )?))
    } else {
        None
    };

    if has_volumes {
        let kms_reachable = config
            .kms_socket_path
            .as_deref()
            .is_some_and(socket_exists);
        if !kms_reachable {
            tracing::warn!(
                jail_id = %config.jail_id,
                "VM declares encrypted volumes but no reachable KMS socket is configured"
            );
        }
    }

    let (exit_tx, mut exit_rx) = mpsc::channel::<ExitRecord>(1);
    let (kill_tx, mut kill_rx) = mpsc::channel::<Signal>(8);

    let exit_task = tokio::spawn(listeners::serve_exit_listener(
        exit_listener.clone(),
        exit_tx,
    ));
    let log_task = tokio::spawn(listeners::serve_log_listener(
        log_listener.clone(),
        log_sink.clone(),
    ));
    let key_task = key_listener.clone().map(|listener| {
        tokio::spawn(listeners::serve_key_listener(
            listener,
            config.volumes.clone(),
            config.kms_socket_path.clone(),
        ))
    });
    let signal_task = tokio::spawn(host_signal_task(kill_tx));

    let mut guest_exit: Option<ExitRecord> = None;

    let final_status = loop {
        let event = tokio::select! {
            signal = kill_rx.recv() => match signal {
                Some(signal) => KilnEvent::HostSignal(signal),
                None => continue,
            },
            record = exit_rx.recv() => match record {
                Some(record) => KilnEvent::GuestExit(record),
                None => continue,
            },
            status = vmm.wait() => KilnEvent::VmmDone(status),
        };

        match event {
            KilnEvent::HostSignal(signal) => {
                tracing::info!(%signal, "forwarding host signal to VMM");
                if let Err(e) = vmm.forward_signal(signal) {
                    tracing::warn!(error = %e, "forwarding signal to VMM");
                }
            }
            KilnEvent::GuestExit(record) => {
                tracing::info!(?record, "guest posted exit record");
                guest_exit = Some(record);
            }
            KilnEvent::VmmDone(status) => {
                break merge(build_vm_partial(status), guest_exit.take());
            }
        }
    };

    signal_task.abort();

    let mut finalizers = Finalizers::new();
    finalizers.push(move || {
        exit_task.abort();
        exit_listener.close();
        Ok(())
    });
    finalizers.push(move || {
        log_task.abort();
        log_listener.close();
        Ok(())
    });
    finalizers.push(move || {
        if let Some(key_task) = key_task {
            key_task.abort();
        }
        if let Some(key_listener) = key_listener {
            key_listener.close();
        }
        Ok(())
    });
    {
        let chroot_dir = chroot_dir.clone();
        finalizers.push(move || {
            let path = chroot_dir.join(pkg_constants::paths::CHROOT_KILN_PID);
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(anyhow::anyhow!("removing kiln.pid: {e}")),
            }
        });
    }
    {
        let log_sink = log_sink.clone();
        finalizers.push(move || {
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(log_sink.close())
            })
            .map_err(|e| anyhow::anyhow!("closing log sink: {e}"))
        });
    }

    let exit_status_path = config.exit_status_path.clone();
    let write_result = write_exit_status(&exit_status_path, &final_status);

    tokio::time::timeout(LISTENER_SHUTDOWN_DEADLINE, async {
        finalizers.run();
    })
    .await
    .ok();

    write_result
}

fn build_vm_partial(status: std::io::Result<std::process::ExitStatus>) -> KilnPartial {
    use std::os::unix::process::ExitStatusExt;
    match status {
        Ok(status) => {
            let vm_signal = status.signal();
            KilnPartial {
                vm_exit_code: status.code(),
                // `status.code()` is `None` when the VMM was terminated by a
                // signal rather than exiting normally; `vm_error` carries the
                // disposition in that case so the written record always has
                // at least one of `vm_exit_code`/`vm_error` set.
                vm_error: vm_signal
                    .filter(|_| status.code().is_none())
                    .map(|signal| format!("VMM terminated by signal {signal}")),
                vm_signal,
            }
        }
        Err(e) => KilnPartial {
            vm_exit_code: None,
            vm_error: Some(e.to_string()),
            vm_signal: None,
        },
    }
}

fn write_exit_status(path: &std::path::Path, status: &KilnExitStatus) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let body = serde_json::to_vec_pretty(status)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, body)?;
    std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o644))?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn write_pid_file(chroot_dir: &std::path::Path) {
    let path = chroot_dir.join(pkg_constants::paths::CHROOT_KILN_PID);
    if let Err(e) = std::fs::write(&path, std::process::id().to_string()) {
        tracing::warn!(error = %e, "writing kiln.pid");
    }
}

async fn host_signal_task(tx: mpsc::Sender<Signal>) {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "installing SIGTERM handler");
            return;
        }
    };
    let mut intr = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "installing SIGINT handler");
            return;
        }
    };
    loop {
        let signal = tokio::select! {
            _ = term.recv() => Signal::SIGTERM,
            _ = intr.recv() => Signal::SIGINT,
        };
        if tx.send(signal).await.is_err() {
            break;
        }
    }
}
