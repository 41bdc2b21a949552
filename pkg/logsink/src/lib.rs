//! Host-side log handling for a running microVM: a size/count/age-bounded
//! rotating writer wrapped in a retriable state machine, exposed to async
//! callers as [`LogSink`].

pub mod error;
pub mod retriable;
pub mod rotate;
pub mod sink;

pub use error::LogSinkError;
pub use retriable::RetriableWriter;
pub use rotate::RotatingWriter;
pub use sink::LogSink;
