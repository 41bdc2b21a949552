//! Step 13: materialize the image's extra files into the guest filesystem
//! before the primary process starts.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;

use pkg_types::config::ExtraFile;

/// Decode and write every extra file, relative to `/rootfs`, creating
/// parent directories and applying the requested mode.
pub fn materialize_files(files: &[ExtraFile]) -> Result<()> {
    for file in files {
        let target = format!("/rootfs{}", file.path);
        if let Some(parent) = Path::new(&target).parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating parent of {target}"))?;
        }

        let content = base64::engine::general_purpose::STANDARD
            .decode(&file.content)
            .with_context(|| format!("decoding base64 content for {}", file.path))?;
        fs::write(&target, content).with_context(|| format!("writing {target}"))?;
        fs::set_permissions(&target, fs::Permissions::from_mode(file.mode))
            .with_context(|| format!("setting mode on {target}"))?;
    }
    Ok(())
}
