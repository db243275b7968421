//! Chunk and index store backends for the silo binary cache proxy.
//!
//! The chunk store holds content-addressed, zstd-compressed chunk files
//! sharded by a 4-hex prefix of the chunk id. The index store holds one
//! index file per cached artifact, listing the ordered chunks that
//! reconstitute it.

pub mod error;
pub mod local;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use local::{LocalChunkStore, LocalIndexStore, TMP_PREFIX};
pub use traits::{ChunkStore, IndexStore, VerifyReport};
