//! Steps 15-17: start the primary process, start the guest HTTP API and
//! signal handlers, then run the supervision loop until the primary exits,
//! producing the [`ExitRecord`] posted back to the host over the exit port.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use pkg_constants::vm::OOM_SCAN_DEADLINE_SECS;
use pkg_types::config::ProcessSpec;
use pkg_types::exit::ExitRecord;

use crate::{log_error, log_info};

/// The guest-local analogue of Kiln's `KilnEvent` union: either a signal
/// arrived to be forwarded to the primary process, or the primary process
/// itself exited.
enum GuestEvent {
    Signal(Signal),
    ProcessExited(std::io::Result<std::process::ExitStatus>),
}

/// Spawn the primary process with the image's environment, stdout/stderr
/// piped to the host log sink via vsock (handled by the caller reading
/// `child.stdout`/`child.stderr`).
pub fn spawn_primary(
    process: &ProcessSpec,
    env: &std::collections::HashMap<String, String>,
) -> Result<Child> {
    let mut cmd = Command::new(&process.cmd);
    cmd.args(&process.args)
        .envs(env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    cmd.spawn()
        .with_context(|| format!("spawning primary process {}", process.cmd))
}

/// Install SIGTERM/SIGINT handlers, bridging both the host-delivered signal
/// task and the guest API's kill channel onto one receiver.
fn spawn_signal_task(kill_tx: mpsc::Sender<Signal>) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log_error!("installing SIGTERM handler: {e}");
                return;
            }
        };
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                log_error!("installing SIGINT handler: {e}");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    if kill_tx.send(Signal::SIGTERM).await.is_err() {
                        break;
                    }
                }
                _ = sigint.recv() => {
                    if kill_tx.send(Signal::SIGINT).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Scan `/dev/kmsg` for an OOM-killer line naming `pid`, waiting at most
/// [`OOM_SCAN_DEADLINE_SECS`]. Run via `spawn_blocking` since `/dev/kmsg`
/// reads are blocking line-at-a-time kernel log reads.
async fn was_oom_killed(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || scan_kmsg_for_oom(pid))
        .await
        .unwrap_or(false)
}

fn scan_kmsg_for_oom(pid: u32) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open("/dev/kmsg") else {
        return false;
    };
    let deadline = Instant::now() + Duration::from_secs(OOM_SCAN_DEADLINE_SECS);
    let needle = format!("Killed process {pid}");
    let mut buf = [0u8; 4096];
    let mut leftover = String::new();

    while Instant::now() < deadline {
        match file.read(&mut buf) {
            Ok(0) => std::thread::sleep(Duration::from_millis(50)),
            Ok(n) => {
                leftover.push_str(&String::from_utf8_lossy(&buf[..n]));
                if leftover.contains(&needle) {
                    return true;
                }
                if leftover.len() > 16_384 {
                    leftover.clear();
                }
            }
            Err(_) => std::thread::sleep(Duration::from_millis(50)),
        }
    }
    false
}

/// Pipe the primary process's stdout/stderr to the host's log vsock port,
/// one line at a time.
pub fn spawn_log_forwarders(child: &mut Child, log_port: u32) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, log_port));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, log_port));
    }
}

async fn forward_lines<R: tokio::io::AsyncRead + Unpin>(reader: R, log_port: u32) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = send_log_line(log_port, &line).await {
                    log_error!("forwarding log line: {e}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                log_error!("reading primary process output: {e}");
                break;
            }
        }
    }
}

async fn send_log_line(log_port: u32, line: &str) -> Result<()> {
    let line = line.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use std::io::Write;
        let mut stream = pkg_vsock::guest::GuestDialer::connect_host(log_port)
            .context("dialing log port")?;
        writeln!(stream, "{line}").context("writing log line")?;
        Ok(())
    })
    .await
    .context("log forwarder task panicked")?
}

/// Run the supervision loop: wait for either a signal or the primary
/// process's exit, forwarding signals and, on exit, building the
/// [`ExitRecord`] to post back to the host.
///
/// `kill_tx`/`kill_rx` are the shared kill-channel: the host-delivered
/// SIGTERM/SIGINT task installed here and the guest HTTP API's `/signal`
/// handler (driven by a clone of `kill_tx` held by the caller) both feed
/// the same receiver.
pub async fn supervise(mut child: Child, kill_tx: mpsc::Sender<Signal>, mut kill_rx: mpsc::Receiver<Signal>) -> ExitRecord {
    let pid = child.id();
    spawn_signal_task(kill_tx);

    loop {
        let event = tokio::select! {
            signal = kill_rx.recv() => {
                match signal {
                    Some(s) => GuestEvent::Signal(s),
                    None => continue,
                }
            }
            status = child.wait() => GuestEvent::ProcessExited(status),
        };

        match event {
            GuestEvent::Signal(signal) => {
                if let Some(pid) = pid {
                    log_info!("forwarding signal {signal} to primary process {pid}");
                    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
                }
            }
            GuestEvent::ProcessExited(status) => {
                return build_exit_record(pid, status).await;
            }
        }
    }
}

async fn build_exit_record(pid: Option<u32>, status: std::io::Result<std::process::ExitStatus>) -> ExitRecord {
    use std::os::unix::process::ExitStatusExt;

    match status {
        Ok(status) => {
            if let Some(signal) = status.signal() {
                let oom_killed = match pid {
                    Some(pid) => was_oom_killed(pid).await,
                    None => false,
                };
                let message = if oom_killed {
                    "Process was killed by OOM killer".to_string()
                } else {
                    format!("Process terminated with signal {signal}")
                };
                ExitRecord {
                    exit_code: Some(-1),
                    oom_killed,
                    signal: Some(signal),
                    message,
                }
            } else {
                ExitRecord {
                    exit_code: status.code().map(i64::from),
                    oom_killed: false,
                    signal: None,
                    message: String::new(),
                }
            }
        }
        Err(e) => ExitRecord {
            exit_code: Some(-1),
            oom_killed: false,
            signal: None,
            message: format!("waiting for primary process: {e}"),
        },
    }
}

/// Post the exit record to the host over the exit vsock port.
pub async fn report_exit(exit_port: u32, record: &ExitRecord) -> Result<()> {
    let body = serde_json::to_vec(record).context("serializing exit record")?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        use std::io::Write;
        let mut stream = pkg_vsock::guest::GuestDialer::connect_host(exit_port)
            .context("dialing exit port")?;
        let request = format!(
            "POST /exit HTTP/1.1\r\nHost: host\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(request.as_bytes()).context("writing exit request headers")?;
        stream.write_all(&body).context("writing exit request body")?;
        Ok(())
    })
    .await
    .context("exit-report task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_exit_record_reports_clean_exit() {
        let status = std::process::Command::new("true").status().unwrap();
        let record = build_exit_record(None, Ok(status)).await;
        assert_eq!(record.exit_code, Some(0));
        assert!(!record.oom_killed);
        assert!(record.signal.is_none());
    }

    #[tokio::test]
    async fn build_exit_record_reports_nonzero_exit() {
        let status = std::process::Command::new("false").status().unwrap();
        let record = build_exit_record(None, Ok(status)).await;
        assert_eq!(record.exit_code, Some(1));
    }

    #[tokio::test]
    async fn build_exit_record_reports_wait_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let record = build_exit_record(None, Err(err)).await;
        assert_eq!(record.exit_code, Some(-1));
        assert!(record.message.contains("boom"));
    }
}
