use std::fmt;
use std::str::FromStr;

use dsr_types::ContentHash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Digest algorithm used to address content blocks.
///
/// The algorithm is fixed for the lifetime of a store: blocks written under
/// one algorithm are not found by hashes computed with another.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256, hex-compatible with existing document-store deployments.
    #[default]
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl DigestAlgorithm {
    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = HasherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(HasherError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Content hasher producing [`ContentHash`] values.
///
/// Unlike a domain-separated object hasher, the digest is computed over the
/// raw value bytes only: two byte-equal values must always collapse onto the
/// same block regardless of which key they were written under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentHasher {
    algorithm: DigestAlgorithm,
}

impl ContentHasher {
    /// SHA-256 hasher.
    pub const SHA256: Self = Self {
        algorithm: DigestAlgorithm::Sha256,
    };
    /// BLAKE3 hasher.
    pub const BLAKE3: Self = Self {
        algorithm: DigestAlgorithm::Blake3,
    };

    /// Create a hasher for the given algorithm.
    pub const fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Hash raw bytes.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut digest = [0u8; 32];
        match self.algorithm {
            DigestAlgorithm::Sha256 => digest.copy_from_slice(&Sha256::digest(data)),
            DigestAlgorithm::Blake3 => digest = *blake3::hash(data).as_bytes(),
        }
        ContentHash::from_digest(digest)
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &ContentHash) -> bool {
        self.hash(data) == *expected
    }

    /// The algorithm this hasher uses.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }
}

/// Errors from hashing configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),
}
