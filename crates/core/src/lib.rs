//! Core domain types and shared logic for the silo binary cache proxy.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and chunk identifiers
//! - Chunk indices reconstituting cached artifacts
//! - NAR archive reading
//! - Narinfo content and store paths
//! - Maintenance configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod nar;
pub mod narinfo;
pub mod store_path;

pub use chunk::{COMPRESSED_CHUNK_EXT, ChunkId};
pub use config::MaintenanceConfig;
pub use error::{Error, Result};
pub use hash::{ContentHash, NarHash};
pub use index::{ArtifactKind, ChunkIndex, IndexChunk};
pub use nar::{NarEntry, NarEntryKind, NarReader};
pub use narinfo::{Compression, NarInfo, Signature};
pub use store_path::StorePath;
