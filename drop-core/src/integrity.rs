//! Integrity: gzip compression and SHA-256 checksums over the compressed payload.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// Fixed gzip header (10) plus trailer (8).
const GZIP_MIN_LEN: usize = 18;

/// Compressed payload and the lowercase hex SHA-256 of those compressed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub checksum: String,
}

impl Compressed {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Compress `data` and checksum the result.
pub fn compress(data: &[u8]) -> io::Result<Compressed> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 64), Compression::default());
    encoder.write_all(data)?;
    let bytes = encoder.finish()?;
    let checksum = checksum(&bytes);
    Ok(Compressed { bytes, checksum })
}

/// Inflate a gzip container. Anything that is not one is `InvalidData`.
pub fn decompress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    if bytes.len() < GZIP_MIN_LEN || bytes[..2] != GZIP_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "payload is not a gzip container",
        ));
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Checksum of received bytes did not match the announced one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("checksum mismatch: expected {expected}, got {actual}")]
pub struct ChecksumMismatch {
    pub expected: String,
    pub actual: String,
}

/// Verify `bytes` against an expected hex checksum (case-insensitive).
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), ChecksumMismatch> {
    let actual = checksum(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
