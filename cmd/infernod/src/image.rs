//! Image resolution, kept behind a narrow trait boundary so a real
//! registry client can be swapped in later without touching `/run`'s
//! handler. The only implementation here shells out to the
//! already-installed `docker` CLI — deliberately thin, the same
//! "narrow collaborator interface" treatment the chroot build gives
//! `mkfs.ext4`.

use std::collections::HashMap;

use tokio::process::Command;

/// The subset of an OCI image's config the chroot build needs: the
/// process to run and the environment it starts with.
#[derive(Debug, Clone, Default)]
pub struct ImageManifest {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<String>,
}

#[async_trait::async_trait]
pub trait ImageProvider: Send + Sync {
    async fn resolve(&self, image: &str) -> anyhow::Result<ImageManifest>;
}

pub struct DockerImageProvider;

#[async_trait::async_trait]
impl ImageProvider for DockerImageProvider {
    async fn resolve(&self, image: &str) -> anyhow::Result<ImageManifest> {
        let pull = Command::new("docker")
            .arg("pull")
            .arg(image)
            .output()
            .await?;
        if !pull.status.success() {
            anyhow::bail!(
                "docker pull {image} failed: {}",
                String::from_utf8_lossy(&pull.stderr)
            );
        }

        let inspect = Command::new("docker")
            .arg("inspect")
            .arg(image)
            .output()
            .await?;
        if !inspect.status.success() {
            anyhow::bail!(
                "docker inspect {image} failed: {}",
                String::from_utf8_lossy(&inspect.stderr)
            );
        }

        let parsed: serde_json::Value = serde_json::from_slice(&inspect.stdout)?;
        let config = parsed
            .get(0)
            .and_then(|v| v.get("Config"))
            .ok_or_else(|| anyhow::anyhow!("docker inspect {image} returned no Config"))?;

        Ok(ImageManifest {
            entrypoint: string_array(config, "Entrypoint"),
            cmd: string_array(config, "Cmd"),
            env: env_map(config),
            workdir: config
                .get("WorkingDir")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    }
}

fn string_array(config: &serde_json::Value, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn env_map(config: &serde_json::Value) -> HashMap<String, String> {
    config
        .get("Env")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| s.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}
