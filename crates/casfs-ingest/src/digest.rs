//! Content hashing: algorithm selection, streaming hasher, digest value.

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use casfs_upload::{HashSuffix, ObjectAddress};

/// Hash algorithms supported for content addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashAlgorithm {
    /// SHA-1, the historical default of the repository format.
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl HashAlgorithm {
    /// Digest width in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 32,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::Sha1 => write!(f, "sha1"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

/// A finalized content digest.
///
/// Fixed 32-byte backing with the algorithm's actual width recorded, so the
/// type stays `Copy` across all supported algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    algorithm: HashAlgorithm,
    bytes: [u8; 32],
    len: u8,
}

impl Digest {
    fn new(algorithm: HashAlgorithm, raw: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..raw.len()].copy_from_slice(raw);
        Self {
            algorithm,
            bytes,
            len: raw.len() as u8,
        }
    }

    /// The algorithm that produced this digest.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Content address of an object with this digest under `suffix`.
    pub fn address(&self, suffix: HashSuffix) -> ObjectAddress {
        ObjectAddress::new(self.to_hex(), suffix)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Streaming hasher for one chunk's uncompressed byte stream.
pub enum ChunkHasher {
    /// SHA-1 state.
    Sha1(sha1::Sha1),
    /// SHA-256 state.
    Sha256(sha2::Sha256),
    /// BLAKE3 state.
    Blake3(Box<blake3::Hasher>),
}

impl ChunkHasher {
    /// Fresh hasher for the given algorithm.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => ChunkHasher::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => ChunkHasher::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Blake3 => ChunkHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// Feed bytes into the running hash.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChunkHasher::Sha1(h) => h.update(data),
            ChunkHasher::Sha256(h) => h.update(data),
            ChunkHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Finalize into a digest.
    pub fn finalize(self) -> Digest {
        match self {
            ChunkHasher::Sha1(h) => Digest::new(HashAlgorithm::Sha1, &h.finalize()),
            ChunkHasher::Sha256(h) => Digest::new(HashAlgorithm::Sha256, &h.finalize()),
            ChunkHasher::Blake3(h) => {
                Digest::new(HashAlgorithm::Blake3, h.finalize().as_bytes())
            }
        }
    }
}

/// One-shot digest of a byte slice.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Digest {
    let mut hasher = ChunkHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}
