//! Chunk identifiers and on-disk naming.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// File extension of compressed chunk files in the local store.
pub const COMPRESSED_CHUNK_EXT: &str = "zst";

/// The content address of one chunk (SHA-256 of the uncompressed bytes).
///
/// Chunk files are named by this id, sharded into subdirectories keyed by
/// the first four hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(ContentHash);

impl ChunkId {
    /// Create from a ContentHash.
    pub fn from_content_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Compute the id of chunk data.
    pub fn compute(data: &[u8]) -> Self {
        Self(ContentHash::compute(data))
    }

    /// Get the underlying content hash.
    pub fn content_hash(&self) -> &ContentHash {
        &self.0
    }

    /// Parse from the hex string used in chunk file names.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        ContentHash::from_hex(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidChunkId(e.to_string()))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// The shard directory for this chunk (first four hex characters).
    pub fn shard_prefix(&self) -> String {
        self.to_hex()[..4].to_string()
    }

    /// The store-relative path of this chunk's compressed file.
    pub fn relative_path(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}.{}", &hex[..4], hex, COMPRESSED_CHUNK_EXT)
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
