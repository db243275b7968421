//! The GC pass: chunk walk, LRU classification, index walk, deletion.

use crate::integrity::{self, IntegrityCheck};
use crate::lru::{ChunkLru, ChunkStat};
use crate::metrics;
use dashmap::DashSet;
use silo_core::{ArtifactKind, COMPRESSED_CHUNK_EXT, ChunkId};
use silo_store::{ChunkStore, IndexStore, StoreError, TMP_PREFIX};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tokio::sync::mpsc;

/// Bytes held back from the payload budget for directory metadata. The
/// chunk store shards files across up to 65,536 subdirectories keyed by a
/// 4-hex prefix of the chunk id, and each directory occupies at least one
/// filesystem block.
pub const DIR_RESERVE: u64 = 0xffff * 4096;

/// Unknown-format index files younger than this are left alone; they may
/// be an in-flight write of a format we do not know yet.
const UNKNOWN_FILE_GRACE: Duration = Duration::minutes(10);

/// The effective byte budget for live chunks.
pub fn live_size_max(cache_size_bytes: u64) -> u64 {
    cache_size_bytes.saturating_sub(DIR_RESERVE)
}

/// Errors that abort a GC pass. An aborted pass deletes nothing; the next
/// tick starts over.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("walking chunk store: {0}")]
    ChunkWalk(#[source] std::io::Error),

    #[error("malformed chunk file name: {0}")]
    MalformedChunkName(String),

    #[error("walking index store: {0}")]
    IndexWalk(#[source] std::io::Error),

    #[error("loading index {path}: {source}")]
    IndexLoad {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

/// Outcome of one completed GC pass.
#[derive(Clone, Debug, Default)]
pub struct GcStats {
    pub live_chunks: usize,
    pub live_bytes: u64,
    pub dead_chunks: usize,
    pub dead_bytes: u64,
    pub index_count: u64,
    pub dead_indices: u64,
    pub inflated_bytes: u64,
}

#[derive(Default)]
struct IndexWalkTotals {
    index_count: u64,
    inflated_bytes: u64,
}

/// Run one GC pass against the given stores with the given live-chunk
/// byte budget.
pub async fn run_gc_pass(
    chunk_store: &Arc<dyn ChunkStore>,
    index_store: &Arc<dyn IndexStore>,
    live_size_max: u64,
) -> Result<GcStats, GcError> {
    metrics::MAX_SIZE.set(live_size_max as i64);

    // Phase 1: walk every chunk on disk and classify live or dead by LRU.
    let mut lru = ChunkLru::new(live_size_max);
    let mut chunk_dirs: i64 = 0;
    let chunk_walk_started = Instant::now();
    let chunk_walk = walk_chunk_store(chunk_store, &mut lru, &mut chunk_dirs).await;
    metrics::CHUNK_WALK_MS.inc_by(chunk_walk_started.elapsed().as_millis() as u64);
    metrics::CHUNK_DIR_COUNT.set(chunk_dirs);
    chunk_walk?;

    metrics::CHUNK_COUNT.set(lru.live_count() as i64);
    metrics::CHUNK_SIZE.set(lru.live_size() as i64);
    metrics::CHUNK_GC_COUNT.inc_by(lru.dead_count() as u64);
    metrics::CHUNK_GC_BYTES.inc_by(lru.dead_size());

    // Phase 2: walk every index, submitting content checks to the worker
    // pool and marking indices that reference dead chunks.
    let dead_indices: Arc<DashSet<PathBuf>> = Arc::new(DashSet::new());
    let (integrity_tx, workers) = integrity::spawn_workers(chunk_store.clone(), dead_indices.clone());

    let mut totals = IndexWalkTotals::default();
    let index_walk_started = Instant::now();
    let index_walk =
        walk_index_store(index_store, &lru, &dead_indices, &integrity_tx, &mut totals).await;

    // Close the submission channel; workers exit once it drains.
    drop(integrity_tx);
    for worker in workers {
        let _ = worker.await;
    }

    metrics::INDEX_WALK_MS.inc_by(index_walk_started.elapsed().as_millis() as u64);
    metrics::INDEX_COUNT.set(totals.index_count as i64);
    metrics::INFLATED_SIZE.set(totals.inflated_bytes as i64);
    index_walk?;

    // Phase 3: delete dead indices, then dead chunks. Indices go first so
    // concurrent readers never observe an index whose chunks are gone.
    let mut dead_index_count = 0u64;
    for entry in dead_indices.iter() {
        let path = entry.key();
        tracing::debug!(path = %path.display(), "Removing dead index");
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove dead index");
            }
        }
        dead_index_count += 1;
    }
    metrics::INDEX_GC_COUNT.inc_by(dead_index_count);

    for id in lru.dead() {
        if let Err(e) = chunk_store.remove_chunk(id).await {
            tracing::warn!(chunk = %id, error = %e, "Failed to remove dead chunk");
        }
    }

    let stats = GcStats {
        live_chunks: lru.live_count(),
        live_bytes: lru.live_size(),
        dead_chunks: lru.dead_count(),
        dead_bytes: lru.dead_size(),
        index_count: totals.index_count,
        dead_indices: dead_index_count,
        inflated_bytes: totals.inflated_bytes,
    };
    tracing::debug!(
        live_chunks = stats.live_chunks,
        live_bytes = stats.live_bytes,
        live_max_bytes = live_size_max,
        dead_chunks = stats.dead_chunks,
        dead_bytes = stats.dead_bytes,
        dead_indices = stats.dead_indices,
        "GC pass complete"
    );
    Ok(stats)
}

/// Enumerate every chunk file under the store root and offer it to the
/// LRU. In-flight `.tmp` files and foreign extensions are skipped; a file
/// that cannot be read back is classified dead on the spot.
async fn walk_chunk_store(
    store: &Arc<dyn ChunkStore>,
    lru: &mut ChunkLru,
    dirs: &mut i64,
) -> Result<(), GcError> {
    let mut stack = vec![store.base_path().to_path_buf()];

    while let Some(dir) = stack.pop() {
        *dirs += 1;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // The directory may have been removed since it was listed.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(GcError::ChunkWalk(e)),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(GcError::ChunkWalk(e)),
            };

            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(GcError::ChunkWalk(e)),
            };
            if file_type.is_dir() {
                stack.push(entry.path());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COMPRESSED_CHUNK_EXT) {
                continue;
            }

            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| GcError::MalformedChunkName(name.to_string()))
                .and_then(|stem| {
                    ChunkId::from_hex(stem)
                        .map_err(|_| GcError::MalformedChunkName(name.to_string()))
                })?;

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(GcError::ChunkWalk(e)),
            };
            let mtime = metadata.modified().map_err(GcError::ChunkWalk)?;
            let stat = ChunkStat {
                id,
                size: metadata.len(),
                mtime: mtime.into(),
            };

            match store.get_chunk(&id).await {
                Ok(_) => lru.add(stat),
                Err(e) => {
                    tracing::error!(chunk = %id, error = %e, "Reading chunk during GC");
                    lru.add_dead(&stat);
                }
            }
        }
    }

    Ok(())
}

/// Enumerate every index file under the store root. Known artifact kinds
/// are always examined; unknown formats only once they are older than the
/// grace window. Each examined index is submitted to the integrity workers
/// and checked against the LRU's dead set.
async fn walk_index_store(
    index_store: &Arc<dyn IndexStore>,
    lru: &ChunkLru,
    dead_indices: &DashSet<PathBuf>,
    integrity_tx: &mpsc::Sender<IntegrityCheck>,
    totals: &mut IndexWalkTotals,
) -> Result<(), GcError> {
    let ignore_newer_than = OffsetDateTime::now_utc() - UNKNOWN_FILE_GRACE;
    let base = index_store.base_path().to_path_buf();
    let mut stack = vec![base.clone()];

    while let Some(dir) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(GcError::IndexWalk(e)),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(GcError::IndexWalk(e)),
            };

            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(GcError::IndexWalk(e)),
            };
            if file_type.is_dir() {
                stack.push(entry.path());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }

            let path = entry.path();
            let kind = ArtifactKind::from_path(&path);
            let kind = match kind {
                Some(kind) => Some(kind),
                None => {
                    // Unknown format: leave fresh files alone, examine old
                    // ones so leftover formats still get cleaned up.
                    let metadata = match entry.metadata().await {
                        Ok(metadata) => metadata,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(GcError::IndexWalk(e)),
                    };
                    let mtime: OffsetDateTime =
                        metadata.modified().map_err(GcError::IndexWalk)?.into();
                    if mtime > ignore_newer_than {
                        continue;
                    }
                    None
                }
            };

            let Ok(relative) = path.strip_prefix(&base) else {
                continue;
            };
            let index = match index_store.get_index(relative).await {
                Ok(index) => index,
                // The file may have been replaced or deleted mid-walk.
                Err(e) if e.is_not_found() => continue,
                Err(source) => return Err(GcError::IndexLoad { path, source }),
            };

            if let Some(kind) = kind {
                let check = IntegrityCheck {
                    path: path.clone(),
                    kind,
                    index: index.clone(),
                };
                if integrity_tx.send(check).await.is_err() {
                    tracing::warn!(
                        path = %path.display(),
                        "Integrity workers gone; skipping content check"
                    );
                }
            }

            totals.inflated_bytes += index.inflated_size();
            totals.index_count += 1;

            if index.is_empty() {
                tracing::debug!(path = %path.display(), "Index references no chunks");
                dead_indices.insert(path);
            } else if let Some(dead_ref) = index.chunks.iter().find(|c| lru.is_dead(&c.id)) {
                tracing::debug!(
                    path = %path.display(),
                    chunk = %dead_ref.id,
                    "Index references dead chunk"
                );
                dead_indices.insert(path);
            }
        }
    }

    Ok(())
}
