//! Local filesystem store backends.

use crate::error::{StoreError, StoreResult};
use crate::traits::{ChunkStore, IndexStore, VerifyReport};
use async_compression::tokio::bufread::{ZstdDecoder, ZstdEncoder};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use silo_core::{COMPRESSED_CHUNK_EXT, ChunkId, ChunkIndex};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Prefix of in-flight files. Anything carrying it is invisible to readers,
/// the verifier, and the GC.
pub const TMP_PREFIX: &str = ".tmp";

/// Local chunk store: zstd-compressed chunk files named by their content
/// address, sharded into subdirectories keyed by the first four hex
/// characters of the id.
pub struct LocalChunkStore {
    base: PathBuf,
}

impl LocalChunkStore {
    /// Create a chunk store rooted at `base`, creating the directory.
    pub async fn new(base: impl AsRef<Path>) -> StoreResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self { base })
    }

    /// The absolute path of a chunk's compressed file.
    pub fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.base.join(id.relative_path())
    }

    /// Enumerate all committed chunk files, skipping in-flight files and
    /// foreign extensions.
    async fn list_chunk_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut stack = vec![self.base.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // The directory may vanish under a concurrent delete.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
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
                if path.extension().and_then(|e| e.to_str()) == Some(COMPRESSED_CHUNK_EXT) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    /// Check one chunk file; returns (corrupt, repaired).
    async fn verify_one(&self, path: &Path, repair: bool) -> (bool, bool) {
        let corrupt = match self.check_file(path).await {
            Ok(()) => false,
            Err(StoreError::NotFound(_)) => false, // raced a concurrent delete
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt chunk file");
                true
            }
        };

        if corrupt && repair {
            match fs::remove_file(path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Removed corrupt chunk file");
                    return (true, true);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove corrupt chunk file");
                }
            }
        }
        (corrupt, false)
    }

    async fn check_file(&self, path: &Path) -> StoreResult<()> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))
            .and_then(|stem| {
                ChunkId::from_hex(stem).map_err(|e| StoreError::InvalidKey(e.to_string()))
            })?;

        let compressed = fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_hex())
            } else {
                StoreError::Io(e)
            }
        })?;
        let data = decompress_zstd(&compressed)
            .await
            .map_err(|e| StoreError::Codec(format!("decompressing {id}: {e}")))?;

        let actual = ChunkId::compute(&data);
        if actual != id {
            return Err(StoreError::HashMismatch {
                expected: id.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    fn base_path(&self) -> &Path {
        &self.base
    }

    async fn get_chunk(&self, id: &ChunkId) -> StoreResult<Bytes> {
        let path = self.chunk_path(id);
        let compressed = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_hex())
            } else {
                StoreError::Io(e)
            }
        })?;

        let data = decompress_zstd(&compressed)
            .await
            .map_err(|e| StoreError::Codec(format!("decompressing chunk {id}: {e}")))?;

        let actual = ChunkId::compute(&data);
        if actual != *id {
            return Err(StoreError::HashMismatch {
                expected: id.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(Bytes::from(data))
    }

    async fn put_chunk(&self, data: Bytes) -> StoreResult<ChunkId> {
        let id = ChunkId::compute(&data);
        let path = self.chunk_path(&id);

        // Content-addressed: an existing file already holds these bytes.
        if fs::try_exists(&path).await? {
            return Ok(id);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let compressed = compress_zstd(&data).await?;

        // Write to an in-flight temp file in the shard directory, fsync,
        // then rename. The temp name keeps the rename on one filesystem
        // and hides the file from readers and the GC until committed.
        let temp_path = path.with_file_name(format!("{TMP_PREFIX}.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&compressed).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;

        Ok(id)
    }

    async fn remove_chunk(&self, id: &ChunkId) -> StoreResult<()> {
        let path = self.chunk_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn verify(&self, parallelism: usize, repair: bool) -> StoreResult<VerifyReport> {
        let files = self.list_chunk_files().await?;
        let parallelism = parallelism.max(1);

        let report = futures::stream::iter(files)
            .map(|path| async move { self.verify_one(&path, repair).await })
            .buffer_unordered(parallelism)
            .fold(VerifyReport::default(), |mut report, (corrupt, repaired)| {
                report.checked += 1;
                report.corrupt += u64::from(corrupt);
                report.repaired += u64::from(repaired);
                async move { report }
            })
            .await;

        Ok(report)
    }
}

/// Local index store: one JSON index file per cached artifact.
pub struct LocalIndexStore {
    base: PathBuf,
}

impl LocalIndexStore {
    /// Create an index store rooted at `base`, creating the directory.
    pub async fn new(base: impl AsRef<Path>) -> StoreResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self { base })
    }

    /// Resolve a store-relative path, rejecting traversal outside the root.
    fn resolve(&self, relative_path: &Path) -> StoreResult<PathBuf> {
        for component in relative_path.components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StoreError::InvalidKey(format!(
                        "unsafe path component in {}",
                        relative_path.display()
                    )));
                }
            }
        }
        Ok(self.base.join(relative_path))
    }
}

#[async_trait]
impl IndexStore for LocalIndexStore {
    fn base_path(&self) -> &Path {
        &self.base
    }

    async fn get_index(&self, relative_path: &Path) -> StoreResult<ChunkIndex> {
        let path = self.resolve(relative_path)?;
        let text = fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(relative_path.display().to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        ChunkIndex::from_json(&text)
            .map_err(|e| StoreError::Codec(format!("{}: {e}", relative_path.display())))
    }

    async fn put_index(&self, relative_path: &Path, index: &ChunkIndex) -> StoreResult<()> {
        let path = self.resolve(relative_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = index
            .to_json()
            .map_err(|e| StoreError::Codec(e.to_string()))?;

        let temp_path = path.with_file_name(format!("{TMP_PREFIX}.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }
}

async fn compress_zstd(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZstdEncoder::new(data);
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).await?;
    Ok(out)
}

async fn decompress_zstd(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZstdDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await?;
    Ok(out)
}
