//! Content fingerprinting: SHA-256 chunk addressing and the fast xxh3 file checksum

use crate::error::ChunkError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use xxhash_rust::xxh3::Xxh3;

/// A 32-byte SHA-256 digest of a chunk's raw bytes. Used as the CAS key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkHash(pub [u8; 32]);

impl ChunkHash {
    /// Return the hash as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self, ChunkError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| ChunkError::InvalidHash(s.to_string()))?;
        Ok(ChunkHash(out))
    }

    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ChunkHash {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Compute the SHA-256 content address of raw chunk bytes
pub fn sha256_hash(data: &[u8]) -> ChunkHash {
    ChunkHash(Sha256::digest(data).into())
}

/// Fast, non-cryptographic 64-bit fingerprint of a whole file's content.
/// Only ever compared for equality; never used for addressing. Serializes as
/// its hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(pub u64);

impl Checksum {
    /// Lowercase, zero-padded 16-character hex form
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// Parse the hex form produced by [`Checksum::to_hex`]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Checksum)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Checksum::from_hex(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid checksum: {}", s)))
    }
}

/// Checksum an in-memory buffer
pub fn checksum_bytes(data: &[u8]) -> Checksum {
    let mut hasher = Xxh3::new();
    hasher.update(data);
    Checksum(hasher.digest())
}

/// Stream a file through xxh3 without loading it fully into memory
pub fn checksum_file(path: &Path) -> std::io::Result<Checksum> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Checksum(hasher.digest()))
}
