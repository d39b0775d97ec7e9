//! SHA-256 content digests.
//!
//! Every blob and every ledger row is keyed by the lowercase hex SHA-256
//! digest of the content's bytes. Input is read in bounded chunks so
//! arbitrarily large files hash in constant memory.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Streaming read chunk size (64 KiB).
const CHUNK_SIZE: usize = 64 * 1024;

/// Computes the digest of everything remaining in `reader`.
///
/// Returns a 64-character lowercase hex string.
pub fn digest_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Computes the digest of a regular file's bytes.
///
/// Host errors (not found, is a directory, permission denied) surface
/// unchanged.
pub fn digest_file(path: &Path) -> io::Result<String> {
    digest_reader(File::open(path)?)
}
