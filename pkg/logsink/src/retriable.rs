//! The retriable-writer state machine named in the design notes:
//! `Open -> Writing -> Renewing -> Closed`. `Write` during `Renewing`
//! blocks up to the backoff cap then retries the factory once; after
//! `Closed` every write returns end-of-stream and any in-flight renew
//! loop observes the closed flag and exits instead of looping forever.

use std::io::{self, ErrorKind};
use std::time::Duration;

use rand::Rng;

use crate::rotate::RotatingWriter;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Writing,
    Renewing,
    Closed,
}

pub struct RetriableWriter<F>
where
    F: Fn() -> io::Result<RotatingWriter> + Send,
{
    factory: F,
    inner: Option<RotatingWriter>,
    state: WriterState,
}

impl<F> RetriableWriter<F>
where
    F: Fn() -> io::Result<RotatingWriter> + Send,
{
    pub fn new(factory: F) -> io::Result<Self> {
        let inner = factory()?;
        Ok(RetriableWriter {
            factory,
            inner: Some(inner),
            state: WriterState::Open,
        })
    }

    /// Write one already-trimmed line. On write error, tears down the
    /// current writer and retries the factory with exponential backoff
    /// plus jitter until either a write succeeds or `close` has been
    /// called.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.state == WriterState::Closed {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "log sink closed"));
        }

        self.state = WriterState::Writing;
        if let Some(writer) = self.inner.as_mut() {
            match writer.write_line(line) {
                Ok(()) => {
                    self.state = WriterState::Open;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "log writer write failed, renewing");
                    self.inner = None;
                }
            }
        }

        self.renew_and_write(line)
    }

    fn renew_and_write(&mut self, line: &str) -> io::Result<()> {
        self.state = WriterState::Renewing;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if self.state == WriterState::Closed {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "log sink closed"));
            }

            match (self.factory)() {
                Ok(mut writer) => match writer.write_line(line) {
                    Ok(()) => {
                        self.inner = Some(writer);
                        self.state = WriterState::Open;
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "renewed writer also failed");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to renew log writer, retrying");
                }
            }

            let jitter = rand::rng().random_range(0..backoff.as_millis() as u64 / 2 + 1);
            std::thread::sleep(backoff + Duration::from_millis(jitter));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Idempotent: a second `close` is a no-op returning success.
    pub fn close(&mut self) -> io::Result<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }
        self.state = WriterState::Closed;
        self.inner = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn write_after_close_returns_unexpected_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.log");
        let policy = pkg_types::config::LogRotationPolicy {
            max_size_mb: 100,
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        };
        let path2 = path.clone();
        let policy2 = policy.clone();
        let mut w =
            RetriableWriter::new(move || RotatingWriter::open(path2.clone(), policy2.clone()))
                .unwrap();
        w.write_line("ok").unwrap();
        w.close().unwrap();
        let err = w.write_line("after close").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn second_close_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.log");
        let policy = pkg_types::config::LogRotationPolicy {
            max_size_mb: 100,
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        };
        let path2 = path.clone();
        let policy2 = policy.clone();
        let mut w =
            RetriableWriter::new(move || RotatingWriter::open(path2.clone(), policy2.clone()))
                .unwrap();
        w.close().unwrap();
        w.close().unwrap();
    }

    #[test]
    fn renews_after_factory_failures_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.log");
        let policy = pkg_types::config::LogRotationPolicy {
            max_size_mb: 100,
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let path2 = path.clone();
        let policy2 = policy.clone();

        let mut w = RetriableWriter::new(move || {
            let n = attempts2.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(io::Error::other("simulated transient failure"))
            } else {
                RotatingWriter::open(path2.clone(), policy2.clone())
            }
        });
        // The initial factory call in `new` counts as attempt 0, which fails.
        assert!(w.is_err());

        // A fresh writer whose factory succeeds on the 3rd attempt (n=2).
        let attempts3 = Arc::new(AtomicU32::new(0));
        let attempts4 = attempts3.clone();
        let path3 = path.clone();
        let policy3 = policy.clone();
        let mut w2 = RetriableWriter::new(move || {
            let n = attempts4.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                RotatingWriter::open(path3.clone(), policy3.clone())
            } else {
                Err(io::Error::other("should not be called again"))
            }
        })
        .unwrap();
        w2.write_line("hello").unwrap();
    }
}
