//! Packs and unpacks the initrd handed to Firecracker: a zstd-compressed
//! "new ASCII" cpio archive carrying exactly two entries, `inferno/init`
//! (the guest PID-1 binary) and `inferno/run.json` (the serialized image
//! config), at the modes fixed in `pkg_constants::paths`.

pub mod error;

use std::io::{Cursor, Read};

pub use error::InitrdError;
use pkg_constants::paths::{
    INITRD_INIT_MODE, INITRD_INIT_PATH, INITRD_RUN_JSON_MODE, INITRD_RUN_JSON_PATH,
};

/// One file inside the archive, its name relative to the initrd root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitrdEntry {
    pub name: String,
    pub mode: u32,
    pub data: Vec<u8>,
}

/// Build the two-entry archive Firecracker's initrd parameter expects and
/// zstd-compress it.
pub fn pack_run_image(init: Vec<u8>, run_json: Vec<u8>) -> Result<Vec<u8>, InitrdError> {
    pack(&[
        InitrdEntry {
            name: INITRD_INIT_PATH.to_string(),
            mode: INITRD_INIT_MODE,
            data: init,
        },
        InitrdEntry {
            name: INITRD_RUN_JSON_PATH.to_string(),
            mode: INITRD_RUN_JSON_MODE,
            data: run_json,
        },
    ])
}

/// Pack an arbitrary set of entries into a zstd-compressed newc cpio
/// archive, in the order given.
pub fn pack(entries: &[InitrdEntry]) -> Result<Vec<u8>, InitrdError> {
    let mut cpio_bytes = Vec::new();
    let inputs = entries.iter().map(|e| {
        let builder = cpio::newc::Builder::new(&e.name).mode(e.mode);
        let reader: Box<dyn Read> = Box::new(Cursor::new(e.data.clone()));
        (builder, reader)
    });
    cpio::newc::write_cpio(inputs, &mut cpio_bytes)?;

    let compressed = zstd::stream::encode_all(Cursor::new(cpio_bytes), 0)?;
    Ok(compressed)
}

/// Decompress and unpack an archive produced by [`pack`] (or by
/// [`pack_run_image`]), returning every entry before the cpio trailer.
pub fn unpack(archive: &[u8]) -> Result<Vec<InitrdEntry>, InitrdError> {
    let cpio_bytes = zstd::stream::decode_all(Cursor::new(archive))?;

    let mut entries = Vec::new();
    let mut cursor: &[u8] = &cpio_bytes;

    loop {
        let mut reader = cpio::newc::Reader::new(cursor)?;
        let name = reader.entry().name().to_string();
        if name == cpio::newc::TRAILER_NAME {
            let remaining = reader.finish()?;
            if !remaining.is_empty() && remaining.iter().any(|b| *b != 0) {
                return Err(InitrdError::TrailingData);
            }
            break;
        }

        let mode = reader.entry().mode();
        let size = reader.entry().file_size() as usize;
        let mut data = vec![0u8; size];
        reader.read_exact(&mut data)?;
        cursor = reader.finish()?;

        entries.push(InitrdEntry { name, mode, data });
    }

    Ok(entries)
}

/// Find the `inferno/init` and `inferno/run.json` entries among a set
/// returned by [`unpack`], in whichever order they were packed.
pub fn find_run_image(entries: &[InitrdEntry]) -> Option<(&InitrdEntry, &InitrdEntry)> {
    let init = entries.iter().find(|e| e.name == INITRD_INIT_PATH)?;
    let run_json = entries.iter().find(|e| e.name == INITRD_RUN_JSON_PATH)?;
    Some((init, run_json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_init_and_run_json() {
        let init_bytes = b"#!fake-elf-init".to_vec();
        let run_json_bytes = br#"{"id":"deadbeef"}"#.to_vec();

        let archive = pack_run_image(init_bytes.clone(), run_json_bytes.clone()).unwrap();
        let entries = unpack(&archive).unwrap();

        assert_eq!(entries.len(), 2);
        let (init, run_json) = find_run_image(&entries).unwrap();
        assert_eq!(init.data, init_bytes);
        assert_eq!(init.mode & 0o777, INITRD_INIT_MODE);
        assert_eq!(run_json.data, run_json_bytes);
        assert_eq!(run_json.mode & 0o777, INITRD_RUN_JSON_MODE);
    }

    #[test]
    fn round_trips_arbitrary_entry_set() {
        let entries = vec![
            InitrdEntry {
                name: "a/one".to_string(),
                mode: 0o644,
                data: vec![1, 2, 3],
            },
            InitrdEntry {
                name: "a/two".to_string(),
                mode: 0o755,
                data: vec![],
            },
            InitrdEntry {
                name: "a/three".to_string(),
                mode: 0o600,
                data: (0..4096u32).map(|n| (n % 256) as u8).collect(),
            },
        ];

        let archive = pack(&entries).unwrap();
        let round_tripped = unpack(&archive).unwrap();

        let as_set: std::collections::BTreeSet<_> = round_tripped
            .into_iter()
            .map(|e| (e.name, e.mode & 0o777, e.data))
            .collect();
        let expected: std::collections::BTreeSet<_> = entries
            .into_iter()
            .map(|e| (e.name, e.mode & 0o777, e.data))
            .collect();
        assert_eq!(as_set, expected);
    }

    #[test]
    fn empty_archive_unpacks_to_no_entries() {
        let archive = pack(&[]).unwrap();
        let entries = unpack(&archive).unwrap();
        assert!(entries.is_empty());
    }
}
