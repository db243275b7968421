//! Chunk indices reconstituting cached artifacts.

use crate::chunk::ChunkId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One chunk reference within an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChunk {
    /// The chunk's content address.
    pub id: ChunkId,
    /// Byte offset of this chunk within the reconstituted artifact.
    pub offset: u64,
    /// Length of the uncompressed chunk in bytes.
    pub length: u64,
}

/// An ordered list of chunk references that reconstitutes one artifact
/// when the chunks are concatenated in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIndex {
    /// The ordered chunk references.
    pub chunks: Vec<IndexChunk>,
}

impl ChunkIndex {
    /// Create an index from ordered (id, length) pairs, assigning offsets.
    pub fn from_chunks(chunks: impl IntoIterator<Item = (ChunkId, u64)>) -> Self {
        let mut offset = 0u64;
        let chunks = chunks
            .into_iter()
            .map(|(id, length)| {
                let chunk = IndexChunk { id, offset, length };
                offset += length;
                chunk
            })
            .collect();
        Self { chunks }
    }

    /// Number of chunks in the index.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index references no chunks. An empty index never
    /// reconstitutes a valid artifact.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Size of the reconstituted artifact in bytes.
    pub fn inflated_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.length).sum()
    }

    /// Check that offsets are contiguous from zero.
    pub fn validate(&self) -> crate::Result<()> {
        let mut expected = 0u64;
        for chunk in &self.chunks {
            if chunk.offset != expected {
                return Err(crate::Error::InvalidIndex(format!(
                    "chunk {} at offset {} (expected {})",
                    chunk.id, chunk.offset, expected
                )));
            }
            expected += chunk.length;
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

/// The two artifact kinds an index can reconstitute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A NAR file-tree archive.
    Nar,
    /// Narinfo metadata referring to a NAR.
    Narinfo,
}

impl ArtifactKind {
    /// Classify an index file path by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("nar") => Some(Self::Nar),
            Some("narinfo") => Some(Self::Narinfo),
            _ => None,
        }
    }
}
