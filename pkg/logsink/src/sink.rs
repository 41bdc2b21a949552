//! `LogSink`: the async-facing wrapper Kiln's log listener drives. Owns
//! the file handle; concurrent writers serialize on its internal lock;
//! the writer is renewable via [`crate::retriable::RetriableWriter`].

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use pkg_types::config::LogRotationPolicy;

use crate::error::LogSinkError;
use crate::retriable::RetriableWriter;
use crate::rotate::RotatingWriter;

type BoxedRetriableWriter =
    RetriableWriter<Box<dyn Fn() -> io::Result<RotatingWriter> + Send + Sync>>;

pub struct LogSink {
    inner: Arc<Mutex<BoxedRetriableWriter>>,
}

impl LogSink {
    pub fn new(path: PathBuf, policy: LogRotationPolicy) -> io::Result<Self> {
        let factory: Box<dyn Fn() -> io::Result<RotatingWriter> + Send + Sync> = {
            let path = path.clone();
            let policy = policy.clone();
            Box::new(move || RotatingWriter::open(path.clone(), policy.clone()))
        };
        let writer = RetriableWriter::new(factory)?;
        Ok(LogSink {
            inner: Arc::new(Mutex::new(writer)),
        })
    }

    /// Forward one already right-trimmed, non-empty line to the
    /// underlying rotating writer. Runs on a blocking thread since file
    /// IO (and any renew-backoff sleep) must not stall the async reactor.
    pub async fn log(&self, line: String) -> Result<(), LogSinkError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut writer = inner.lock().unwrap();
            writer.write_line(&line)
        })
        .await
        .map_err(|e| LogSinkError::Io(io::Error::other(format!("log sink task panicked: {e}"))))?
        .map_err(LogSinkError::from)
    }

    pub async fn close(&self) -> Result<(), LogSinkError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut writer = inner.lock().unwrap();
            writer.close()
        })
        .await
        .map_err(|e| LogSinkError::Io(io::Error::other(format!("log sink task panicked: {e}"))))?
        .map_err(LogSinkError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logs_lines_and_closes_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.log");
        let policy = LogRotationPolicy {
            max_size_mb: 100,
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        };
        let sink = LogSink::new(path.clone(), policy).unwrap();
        sink.log("hello".to_string()).await.unwrap();
        sink.log("world".to_string()).await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "hello\nworld\n");
    }

    #[tokio::test]
    async fn log_after_close_returns_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.log");
        let policy = LogRotationPolicy {
            max_size_mb: 100,
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        };
        let sink = LogSink::new(path, policy).unwrap();
        sink.close().await.unwrap();
        let err = sink.log("too late".to_string()).await.unwrap_err();
        assert_eq!(io::Error::from(err).kind(), io::ErrorKind::UnexpectedEof);
    }
}
