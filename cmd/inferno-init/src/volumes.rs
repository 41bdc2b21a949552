//! Step 5: unlock encrypted volumes before the rootfs is mounted.
//!
//! The guest has no full HTTP client available this early in boot, so
//! the key fetch is a minimal hand-rolled HTTP/1.1 GET over a blocking
//! `pkg_vsock::GuestDialer` connection.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use pkg_types::volume::{Mounts, Volume};
use pkg_vsock::guest::GuestDialer;

use crate::{log_error, log_info};

/// LUKS passphrase bytes, zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

impl ZeroizingKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(serde::Deserialize)]
struct KeyResponseBody {
    data: KeyResponseData,
}

#[derive(serde::Deserialize)]
struct KeyResponseData {
    data: std::collections::HashMap<String, serde_json::Value>,
}

/// `GET /v1/volume/key?device=<dev>` over the vsock key port, returning the
/// decoded LUKS passphrase.
fn fetch_volume_key(key_port: u32, device: &str) -> Result<ZeroizingKey> {
    let mut stream = GuestDialer::connect_host(key_port)
        .with_context(|| format!("dialing key port {key_port} for {device}"))?;

    let request = format!(
        "GET /v1/volume/key?device={device} HTTP/1.1\r\nHost: host\r\nConnection: close\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .context("writing key request")?;

    let mut reader = BufReader::new(&mut stream);
    let mut status_line = String::new();
    reader.read_line(&mut status_line).context("reading status line")?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).context("reading header line")?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some(value) = header
            .to_ascii_lowercase()
            .strip_prefix("content-length:")
            .map(|v| v.trim().to_string())
        {
            content_length = value.parse().unwrap_or(0);
        }
    }

    if status != 200 {
        bail!("key fetch for {device} returned HTTP {status}");
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).context("reading key response body")?;

    let parsed: KeyResponseBody =
        serde_json::from_slice(&body).context("parsing key response JSON")?;
    let key_b64 = parsed
        .data
        .data
        .get("key")
        .and_then(|v| v.as_str())
        .context("key response missing `key` field")?;
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .context("decoding base64 LUKS key")?;

    Ok(ZeroizingKey(key_bytes))
}

/// Unlock one encrypted volume: fetch its key, pipe it to `cryptsetup open`,
/// and zero it afterward regardless of outcome.
pub fn unlock_volume(vol: &Volume, key_port: u32) -> Result<()> {
    let mapper_name = Mounts::mapper_name(&vol.device);
    log_info!("unlocking encrypted volume {} -> {}", vol.device, mapper_name);

    let key = fetch_volume_key(key_port, &vol.device)
        .with_context(|| format!("fetching key for {}", vol.device))?;

    let mut child = Command::new("cryptsetup")
        .args(["open", "--key-file=-", &vol.device, &mapper_name])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawning cryptsetup")?;

    let write_result = child
        .stdin
        .take()
        .context("cryptsetup stdin not piped")?
        .write_all(key.as_bytes());

    let status = child.wait().context("waiting for cryptsetup")?;

    if let Err(e) = write_result {
        log_error!("writing key to cryptsetup for {}: {e}", vol.device);
    }

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut s) = child.stderr {
            let _ = s.read_to_string(&mut stderr);
        }
        bail!("cryptsetup open failed for {}: {}", vol.device, stderr.trim());
    }

    Ok(())
}

/// The device-mapper path a caller should mount instead of the raw device,
/// once `unlock_volume` has succeeded.
pub fn mapper_device_path(vol: &Volume) -> String {
    format!("/dev/mapper/{}", Mounts::mapper_name(&vol.device))
}
