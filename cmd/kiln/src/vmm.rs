//! Owns the Firecracker VMM subprocess. Stdout/stderr are piped rather
//! than redirected straight to a log file, since every line is
//! re-emitted as a structured `tracing` record tagged `source=firecracker`.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// A running (or exited) Firecracker VMM process.
pub struct VmmProcess {
    pub id: String,
    child: Child,
}

impl VmmProcess {
    /// Spawn the VMM binary pointed at its API socket and config file.
    /// `uid`/`gid`, when set, are passed through as jailer passthrough
    /// flags rather than applied to Kiln's own process.
    pub fn spawn(
        vmm_path: &Path,
        id: &str,
        api_sock: &Path,
        config_file: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<Self> {
        let mut cmd = Command::new(vmm_path);
        cmd.arg("--id")
            .arg(id)
            .arg("--api-sock")
            .arg(api_sock)
            .arg("--config-file")
            .arg(config_file);
        if let Some(uid) = uid {
            cmd.arg("--uid").arg(uid.to_string());
        }
        if let Some(gid) = gid {
            cmd.arg("--gid").arg(gid.to_string());
        }
        let child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("spawning VMM binary {}", vmm_path.display()))?;

        Ok(VmmProcess {
            id: id.to_string(),
            child,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Spawn the two reader tasks that re-emit VMM stdout/stderr as
    /// structured tracing events.
    pub fn spawn_log_forwarders(&mut self) {
        if let Some(stdout) = self.child.stdout.take() {
            tokio::spawn(forward_stream(stdout, "stdout"));
        }
        if let Some(stderr) = self.child.stderr.take() {
            tokio::spawn(forward_stream(stderr, "stderr"));
        }
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    pub fn forward_signal(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal)
            .with_context(|| format!("forwarding {signal} to VMM pid {pid}"))
    }
}

async fn forward_stream<R: tokio::io::AsyncRead + Unpin>(stream: R, source: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::info!(source = "firecracker", stream = source, line = %line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(source = "firecracker", stream = source, error = %e, "reading VMM output");
                break;
            }
        }
    }
}
