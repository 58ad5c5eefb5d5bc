//! File digests used for cache validation and installer identity.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha256};

const READ_BUFFER: usize = 64 * 1024;

/// Digest algorithms published next to repository artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-1, published as `<file>.sha1`.
    Sha1,
    /// SHA-256, published as `<file>.sha256`.
    Sha256,
}

impl HashAlgorithm {
    /// Side-channel algorithms in the order they are consulted.
    pub const SIDE_CHANNELS: [Self; 2] = [Self::Sha1, Self::Sha256];

    /// Extension appended to an artifact URL to fetch its published digest.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Lower-case hex digest of the file at `path`.
    pub fn hash_file(self, path: &Path) -> io::Result<String> {
        let file = File::open(path)?;
        match self {
            Self::Sha1 => digest_reader::<Sha1>(file),
            Self::Sha256 => digest_reader::<Sha256>(file),
        }
    }

    /// Lower-case hex digest of `bytes`.
    #[must_use]
    pub fn hash_bytes(self, bytes: &[u8]) -> String {
        match self {
            Self::Sha1 => hex::encode(Sha1::digest(bytes)),
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
        }
    }
}

fn digest_reader<D: Digest>(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-1 of the file at `path`, the identity hash for installers and caches.
pub fn sha1_file(path: &Path) -> io::Result<String> {
    HashAlgorithm::Sha1.hash_file(path)
}

/// Extracts the digest from a published side-channel file body.
///
/// Bodies are either the bare hex digest or `<digest>  <file name>`.
#[must_use]
pub fn parse_side_channel(body: &str) -> Option<String> {
    body.split_whitespace()
        .next()
        .filter(|token| token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_ascii_lowercase)
}
