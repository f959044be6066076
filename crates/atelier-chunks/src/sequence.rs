//! Chunk sequence wire format: comma-joined lowercase hex SHA-256 hashes.
//!
//! Order is significant. An empty file has an empty sequence, serialized as `""`.

use crate::error::ChunkError;
use crate::fingerprint::ChunkHash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Separator between hashes in the serialized form
pub const DELIMITER: char = ',';

/// Ordered list of chunk hashes that reconstructs exactly one file version
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChunkSequence(Vec<ChunkHash>);

impl ChunkSequence {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hash
    pub fn push(&mut self, hash: ChunkHash) {
        self.0.push(hash);
    }

    /// Hashes in order
    pub fn hashes(&self) -> &[ChunkHash] {
        &self.0
    }

    /// Number of entries, duplicates included
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the sequence of an empty file
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over hashes in order
    pub fn iter(&self) -> std::slice::Iter<'_, ChunkHash> {
        self.0.iter()
    }

    /// Hashes with duplicates removed, first occurrence order preserved
    pub fn unique(&self) -> Vec<ChunkHash> {
        let mut seen = std::collections::HashSet::with_capacity(self.0.len());
        self.0.iter().filter(|h| seen.insert(**h)).copied().collect()
    }
}

impl From<Vec<ChunkHash>> for ChunkSequence {
    fn from(hashes: Vec<ChunkHash>) -> Self {
        Self(hashes)
    }
}

impl<'a> IntoIterator for &'a ChunkSequence {
    type Item = &'a ChunkHash;
    type IntoIter = std::slice::Iter<'a, ChunkHash>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::fmt::Display for ChunkSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, hash) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", DELIMITER)?;
            }
            write!(f, "{}", hash)?;
        }
        Ok(())
    }
}

impl FromStr for ChunkSequence {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::new());
        }
        s.split(DELIMITER)
            .map(|part| {
                if part.len() != 64 || part.bytes().any(|b| b.is_ascii_uppercase()) {
                    return Err(ChunkError::InvalidSequence(format!(
                        "bad entry {:?}",
                        part
                    )));
                }
                ChunkHash::from_hex(part)
                    .map_err(|_| ChunkError::InvalidSequence(format!("bad entry {:?}", part)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Serialize for ChunkSequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChunkSequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
