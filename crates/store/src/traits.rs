//! Store trait definitions.

use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;
use silo_core::{ChunkId, ChunkIndex};
use std::path::Path;

/// Outcome of a full chunk store self-check.
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    /// Number of chunk files examined.
    pub checked: u64,
    /// Number of files whose content did not match their address, could
    /// not be decoded, or carried a malformed name.
    pub corrupt: u64,
    /// Number of corrupt files removed (only with repair enabled).
    pub repaired: u64,
}

impl VerifyReport {
    /// Whether every checked chunk was intact.
    pub fn is_clean(&self) -> bool {
        self.corrupt == 0
    }
}

/// Content-addressed chunk storage.
///
/// Implementations must tolerate concurrent reads, and concurrent reads
/// with writes and deletes; the maintenance subsystem relies on this.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Filesystem root holding the chunk files.
    fn base_path(&self) -> &Path;

    /// Read a chunk and validate it against its content address.
    async fn get_chunk(&self, id: &ChunkId) -> StoreResult<Bytes>;

    /// Store a chunk, returning its content address. Writing an already
    /// present chunk is a no-op.
    async fn put_chunk(&self, data: Bytes) -> StoreResult<ChunkId>;

    /// Delete a chunk. Removing an absent chunk is not an error.
    async fn remove_chunk(&self, id: &ChunkId) -> StoreResult<()>;

    /// Check every stored chunk against its content address with the given
    /// parallelism. With `repair`, malformed files are removed. Failures
    /// are reported through the returned report and logged as they are
    /// found.
    async fn verify(&self, parallelism: usize, repair: bool) -> StoreResult<VerifyReport>;
}

/// Storage for artifact chunk indices.
#[async_trait]
pub trait IndexStore: Send + Sync + 'static {
    /// Filesystem root holding the index files.
    fn base_path(&self) -> &Path;

    /// Deserialise one index by its store-relative path.
    async fn get_index(&self, relative_path: &Path) -> StoreResult<ChunkIndex>;

    /// Write one index at the given store-relative path.
    async fn put_index(&self, relative_path: &Path, index: &ChunkIndex) -> StoreResult<()>;
}
