//! The rotating file writer: size/count/age-bounded, optionally
//! gzip-compressing backups on rotation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;

use pkg_types::config::LogRotationPolicy;

pub struct RotatingWriter {
    path: PathBuf,
    policy: LogRotationPolicy,
    file: File,
    size: u64,
}

impl RotatingWriter {
    pub fn open(path: PathBuf, policy: LogRotationPolicy) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        Ok(RotatingWriter {
            path,
            policy,
            file,
            size,
        })
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let bytes = line.as_bytes();
        self.file.write_all(bytes)?;
        self.file.write_all(b"\n")?;
        self.size += bytes.len() as u64 + 1;

        if self.size >= self.policy.max_size_mb * 1024 * 1024 {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let rotated_path = self.path.with_extension(format!(
            "{}.1",
            self.path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("log")
        ));
        self.shift_backups()?;
        fs::rename(&self.path, &rotated_path)?;

        if self.policy.compress {
            Self::compress(&rotated_path)?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = 0;

        self.enforce_retention()?;
        Ok(())
    }

    /// Shift `<path>.1[.gz]` -> `<path>.2[.gz]` -> ... before the new
    /// rotation claims slot 1.
    fn shift_backups(&self) -> io::Result<()> {
        for n in (1..self.policy.max_backups).rev() {
            for suffix in [".gz", ""] {
                let from = self.backup_path(n, suffix);
                let to = self.backup_path(n + 1, suffix);
                if from.exists() {
                    fs::rename(from, to)?;
                }
            }
        }
        Ok(())
    }

    fn backup_path(&self, n: u32, suffix: &str) -> PathBuf {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("log");
        self.path.with_extension(format!("{ext}.{n}{suffix}"))
    }

    fn compress(path: &Path) -> io::Result<()> {
        let data = fs::read(path)?;
        let gz_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".gz");
            PathBuf::from(p)
        };
        let gz_file = File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(gz_file, Compression::default());
        encoder.write_all(&data)?;
        encoder.finish()?;
        fs::remove_file(path)?;
        Ok(())
    }

    fn enforce_retention(&self) -> io::Result<()> {
        let max_age = Duration::from_secs(self.policy.max_age_days as u64 * 24 * 3600);
        let now = SystemTime::now();
        for n in 1..=self.policy.max_backups + 1 {
            for suffix in [".gz", ""] {
                let path = self.backup_path(n, suffix);
                if !path.exists() {
                    continue;
                }
                if n > self.policy.max_backups {
                    let _ = fs::remove_file(&path);
                    continue;
                }
                if let Ok(meta) = fs::metadata(&path) {
                    if let Ok(modified) = meta.modified() {
                        if now.duration_since(modified).unwrap_or_default() > max_age {
                            let _ = fs::remove_file(&path);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_size_mb: u64) -> LogRotationPolicy {
        LogRotationPolicy {
            max_size_mb,
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        }
    }

    #[test]
    fn writes_accumulate_without_rotating_under_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.log");
        let mut w = RotatingWriter::open(path.clone(), policy(100)).unwrap();
        for _ in 0..10 {
            w.write_line("hello world").unwrap();
        }
        assert!(path.exists());
        assert!(!path.with_extension("log.1").exists());
    }

    #[test]
    fn rotation_produces_gz_backup_and_resets_primary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.log");
        // 1 byte-sized "MB" forces rotation on the very first line.
        let mut w = RotatingWriter::open(path.clone(), policy(0)).unwrap();
        w.write_line("first line").unwrap();
        w.write_line("second line").unwrap();
        assert!(path.with_extension("log.1.gz").exists());
        assert!(path.exists());
    }
}
