use std::io;

#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    #[error("log sink closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<LogSinkError> for io::Error {
    fn from(e: LogSinkError) -> Self {
        match e {
            LogSinkError::Closed => io::Error::new(io::ErrorKind::UnexpectedEof, "log sink closed"),
            LogSinkError::Io(e) => e,
        }
    }
}
