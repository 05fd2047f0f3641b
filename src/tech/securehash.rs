use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha512};

use crate::core::meta::InputSpec;
use crate::error::Result;

const READ_BLOCK_SIZE: usize = 1024 * 1024;

/// SHA-512 over netstring-framed bytes: `{len}:` + content + `;{len}`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    let size = bytes.len();
    hasher.update(format!("{}:", size).as_bytes());
    hasher.update(bytes);
    hasher.update(format!(";{}", size).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-512 over a netstring-framed stream of known size.
pub fn hash_reader(mut reader: impl Read, size: u64) -> Result<String> {
    let mut hasher = Sha512::new();
    hasher.update(format!("{}:", size).as_bytes());

    let mut buffer = vec![0; READ_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    hasher.update(format!(";{}", size).as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-512 of a file, netstring-framed by its size.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    hash_reader(BufReader::new(file), size)
}

/// Content identity of a bead: digest of the per-file digests in canonical
/// (sorted path) order plus the core metadata fields. Independent of the
/// storage layout and the archive's location.
pub fn content_id(
    manifest: &BTreeMap<String, String>,
    kind: &str,
    freeze_time: &str,
    inputs: &[InputSpec],
) -> String {
    let mut hasher = Sha512::new();

    for (path, digest) in manifest {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }

    hasher.update(kind.as_bytes());
    hasher.update(b"\n");
    hasher.update(freeze_time.as_bytes());
    hasher.update(b"\n");

    for input in inputs {
        hasher.update(input.name.as_bytes());
        hasher.update(b":");
        hasher.update(input.kind.as_bytes());
        hasher.update(b":");
        hasher.update(input.content_id.as_bytes());
        hasher.update(b":");
        hasher.update(input.freeze_time.as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}
