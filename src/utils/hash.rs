use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};

/// Digest length in bytes (128 bits).
pub const CHECKSUM_LEN: usize = 16;

const BUFFER_SIZE: usize = 64 * 1024;

/// BLAKE3 content checksum of a byte slice, truncated to 128 bits and hex-encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    finish(&hasher)
}

/// Same digest as [`hash_bytes`], streamed from disk so large videos are never
/// held in memory.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0; BUFFER_SIZE];

    loop {
        let count = reader.read(&mut buffer).map_err(|e| Error::io(path, e))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(finish(&hasher))
}

fn finish(hasher: &blake3::Hasher) -> String {
    let mut digest = [0u8; CHECKSUM_LEN];
    hasher.finalize_xof().fill(&mut digest);

    digest.iter().fold(String::with_capacity(CHECKSUM_LEN * 2), |mut hex, byte| {
        let _ = write!(hex, "{byte:02x}");
        hex
    })
}
