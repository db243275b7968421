//! Integrity workers validating artifact content reconstituted from chunks.
//!
//! Chunks that pass content-address verification can still concatenate into
//! a broken artifact: truncation mid-stream, wrong chunk order in the index,
//! or a NAR format violation. A small worker pool re-assembles each
//! submitted artifact and parses it; failures mark the index path dead.

use dashmap::DashSet;
use silo_core::{ArtifactKind, ChunkId, ChunkIndex, NarInfo, NarReader};
use silo_store::{ChunkStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Number of integrity workers per GC pass.
const WORKER_COUNT: usize = 3;

/// One artifact submitted for content validation.
pub struct IntegrityCheck {
    /// Absolute path of the index file.
    pub path: PathBuf,
    /// Artifact kind, by index file extension.
    pub kind: ArtifactKind,
    /// The index to reconstitute.
    pub index: ChunkIndex,
}

#[derive(Debug, Error)]
enum CheckError {
    #[error("fetching chunk {id}: {source}")]
    Chunk { id: ChunkId, source: StoreError },

    #[error("chunk {id} is {actual} bytes, index says {expected}")]
    Length {
        id: ChunkId,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Core(#[from] silo_core::Error),

    #[error("NAR contains no entries")]
    EmptyNar,

    #[error("narinfo is not valid UTF-8")]
    NotUtf8,
}

/// Spawn the worker pool. Workers drain the returned channel until it is
/// closed and empty; the caller closes it by dropping the sender once the
/// index walk ends, then joins the handles. Dead paths land in
/// `dead_indices`; workers never touch the LRU.
pub fn spawn_workers(
    store: Arc<dyn ChunkStore>,
    dead_indices: Arc<DashSet<PathBuf>>,
) -> (mpsc::Sender<IntegrityCheck>, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::channel::<IntegrityCheck>(1);
    let rx = Arc::new(Mutex::new(rx));

    let handles = (0..WORKER_COUNT)
        .map(|worker| {
            let store = store.clone();
            let dead_indices = dead_indices.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    // Hold the lock only for the receive so the pool
                    // drains concurrently.
                    let check = { rx.lock().await.recv().await };
                    let Some(check) = check else { break };
                    run_check(&*store, &dead_indices, check).await;
                }
                tracing::trace!(worker, "Integrity worker done");
            })
        })
        .collect();

    (tx, handles)
}

async fn run_check(store: &dyn ChunkStore, dead_indices: &DashSet<PathBuf>, check: IntegrityCheck) {
    let result = match check.kind {
        ArtifactKind::Nar => check_nar_contents(store, &check.index).await,
        ArtifactKind::Narinfo => check_narinfo(store, &check.index).await,
    };

    if let Err(e) = result {
        tracing::error!(
            path = %check.path.display(),
            kind = ?check.kind,
            error = %e,
            "Artifact failed integrity check"
        );
        dead_indices.insert(check.path);
    }
}

/// Assemble the artifact and parse it as a NAR archive, walking all
/// entries.
async fn check_nar_contents(store: &dyn ChunkStore, index: &ChunkIndex) -> Result<(), CheckError> {
    let bytes = assemble(store, index).await?;

    let mut reader = NarReader::new(bytes.as_slice());
    let mut entries = 0usize;
    while reader.next_entry()?.is_some() {
        entries += 1;
    }
    if entries == 0 {
        return Err(CheckError::EmptyNar);
    }
    Ok(())
}

/// Assemble the artifact and parse it as narinfo metadata.
async fn check_narinfo(store: &dyn ChunkStore, index: &ChunkIndex) -> Result<(), CheckError> {
    let bytes = assemble(store, index).await?;
    let text = std::str::from_utf8(&bytes).map_err(|_| CheckError::NotUtf8)?;
    NarInfo::parse(text)?;
    Ok(())
}

/// Concatenate the index's chunks in order, checking each against the
/// recorded length. Chunk reads may run concurrently with the GC's chunk
/// walk; both are read-only at that stage.
async fn assemble(store: &dyn ChunkStore, index: &ChunkIndex) -> Result<Vec<u8>, CheckError> {
    index.validate()?;

    let mut out = Vec::new();
    for chunk in &index.chunks {
        let bytes = store
            .get_chunk(&chunk.id)
            .await
            .map_err(|source| CheckError::Chunk {
                id: chunk.id,
                source,
            })?;
        if bytes.len() as u64 != chunk.length {
            return Err(CheckError::Length {
                id: chunk.id,
                expected: chunk.length,
                actual: bytes.len() as u64,
            });
        }
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}
