use std::io;

#[derive(Debug, thiserror::Error)]
pub enum InitrdError {
    #[error("io error packing/unpacking initrd: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected trailing data after cpio trailer")]
    TrailingData,

    #[error("entry {0} exceeds the in-memory size cap")]
    EntryTooLarge(String),
}
