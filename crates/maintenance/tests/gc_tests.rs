//! End-to-end GC pass tests against real on-disk stores.

use bytes::Bytes;
use silo_core::{ChunkId, ChunkIndex};
use silo_maintenance::run_gc_pass;
use silo_store::{ChunkStore, IndexStore, LocalChunkStore, LocalIndexStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// A budget large enough that nothing is evicted for size.
const ROOMY_BUDGET: u64 = 1 << 30;

struct Fixture {
    _dir: TempDir,
    chunk_base: PathBuf,
    index_base: PathBuf,
    chunks: Arc<dyn ChunkStore>,
    indices: Arc<dyn IndexStore>,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let chunk_base = dir.path().join("chunks");
    let index_base = dir.path().join("indices");
    let chunks: Arc<dyn ChunkStore> =
        Arc::new(LocalChunkStore::new(&chunk_base).await.unwrap());
    let indices: Arc<dyn IndexStore> =
        Arc::new(LocalIndexStore::new(&index_base).await.unwrap());
    Fixture {
        _dir: dir,
        chunk_base,
        index_base,
        chunks,
        indices,
    }
}

fn chunk_file(base: &Path, id: &ChunkId) -> PathBuf {
    base.join(id.relative_path())
}

fn set_mtime(path: &Path, secs_ago: u64) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    let mtime = SystemTime::now() - Duration::from_secs(secs_ago);
    file.set_modified(mtime).unwrap();
}

/// Store an artifact's bytes as fixed-size chunks and return its index.
async fn store_chunked(
    fx: &Fixture,
    artifact: &[u8],
    chunk_size: usize,
    mtime_secs_ago: u64,
) -> ChunkIndex {
    let mut chunks = Vec::new();
    for piece in artifact.chunks(chunk_size) {
        let id = fx
            .chunks
            .put_chunk(Bytes::copy_from_slice(piece))
            .await
            .unwrap();
        set_mtime(&chunk_file(&fx.chunk_base, &id), mtime_secs_ago);
        chunks.push((id, piece.len() as u64));
    }
    ChunkIndex::from_chunks(chunks)
}

fn put_str(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s);
    out.extend_from_slice(&vec![0u8; (8 - s.len() % 8) % 8]);
}

/// Encode a single-file NAR archive.
fn file_nar(contents: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let tokens: [&[u8]; 5] = [b"nix-archive-1", b"(", b"type", b"regular", b"contents"];
    for token in tokens {
        put_str(&mut out, token);
    }
    put_str(&mut out, contents);
    put_str(&mut out, b")");
    out
}

/// Encode a directory NAR with the given (ordered) regular-file entries.
fn dir_nar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let header: [&[u8]; 4] = [b"nix-archive-1", b"(", b"type", b"directory"];
    for token in header {
        put_str(&mut out, token);
    }
    for (name, contents) in entries {
        put_str(&mut out, b"entry");
        put_str(&mut out, b"(");
        put_str(&mut out, b"name");
        put_str(&mut out, name.as_bytes());
        put_str(&mut out, b"node");
        let inner: [&[u8]; 4] = [b"(", b"type", b"regular", b"contents"];
        for token in inner {
            put_str(&mut out, token);
        }
        put_str(&mut out, contents);
        put_str(&mut out, b")");
        put_str(&mut out, b")");
    }
    put_str(&mut out, b")");
    out
}

fn on_disk_size(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

#[tokio::test]
async fn budget_eviction_cascades_to_referencing_index() {
    let fx = fixture().await;

    // One valid NAR split across two chunks; the older chunk will fall
    // out of budget.
    let nar = file_nar(b"cascade artifact body, long enough to split");
    let mid = nar.len() / 2;
    let c1 = fx
        .chunks
        .put_chunk(Bytes::copy_from_slice(&nar[..mid]))
        .await
        .unwrap();
    let c2 = fx
        .chunks
        .put_chunk(Bytes::copy_from_slice(&nar[mid..]))
        .await
        .unwrap();
    let c1_path = chunk_file(&fx.chunk_base, &c1);
    let c2_path = chunk_file(&fx.chunk_base, &c2);
    set_mtime(&c1_path, 10_000);
    set_mtime(&c2_path, 10);

    let index = ChunkIndex::from_chunks(vec![
        (c1, mid as u64),
        (c2, (nar.len() - mid) as u64),
    ]);
    fx.indices
        .put_index(Path::new("a.nar"), &index)
        .await
        .unwrap();

    // Budget fits only the newer chunk.
    let budget = on_disk_size(&c2_path);
    let stats = run_gc_pass(&fx.chunks, &fx.indices, budget).await.unwrap();

    assert_eq!(stats.dead_chunks, 1);
    assert_eq!(stats.dead_indices, 1);
    assert!(!fx.index_base.join("a.nar").exists());
    assert!(!c1_path.exists());
    assert!(c2_path.exists(), "the in-budget chunk survives");
}

#[tokio::test]
async fn empty_index_is_deleted_without_touching_chunks() {
    let fx = fixture().await;

    let keeper = store_chunked(&fx, &file_nar(b"unrelated"), 64, 100).await;
    fx.indices
        .put_index(Path::new("keep.nar"), &keeper)
        .await
        .unwrap();
    fx.indices
        .put_index(Path::new("b.narinfo"), &ChunkIndex { chunks: vec![] })
        .await
        .unwrap();

    let stats = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();

    assert!(!fx.index_base.join("b.narinfo").exists());
    assert_eq!(stats.dead_chunks, 0);
    for chunk in &keeper.chunks {
        assert!(chunk_file(&fx.chunk_base, &chunk.id).exists());
    }
}

#[tokio::test]
async fn inflight_tmp_files_are_never_classified_or_deleted() {
    let fx = fixture().await;

    let tmp_chunk = fx.chunk_base.join(".tmp-xyz.zst");
    std::fs::write(&tmp_chunk, b"partial upload").unwrap();
    let tmp_index = fx.index_base.join(".tmp-upload.nar");
    std::fs::write(&tmp_index, b"partial index").unwrap();

    let stats = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();

    assert!(tmp_chunk.exists());
    assert!(tmp_index.exists());
    assert_eq!(stats.live_chunks, 0);
    assert_eq!(stats.dead_chunks, 0);
    assert_eq!(stats.index_count, 0);
}

#[tokio::test]
async fn corrupt_chunk_is_dead_and_kills_referencing_index() {
    let fx = fixture().await;

    // A chunk file whose content does not match its address.
    let id = ChunkId::compute(b"what the file should hold");
    let path = chunk_file(&fx.chunk_base, &id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"but holds this garbage instead").unwrap();

    let index = ChunkIndex::from_chunks(vec![(id, 25)]);
    fx.indices
        .put_index(Path::new("c.narinfo"), &index)
        .await
        .unwrap();

    let stats = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();

    assert_eq!(stats.dead_chunks, 1);
    assert!(!path.exists(), "corrupt chunk is removed");
    assert!(!fx.index_base.join("c.narinfo").exists());
}

#[tokio::test]
async fn parse_failure_kills_index_but_keeps_valid_chunks() {
    let fx = fixture().await;

    // Byte-valid chunks whose concatenation is a NAR truncated mid-stream.
    let nar = dir_nar(&[("alpha", b"aaaa"), ("beta", b"bbbb")]);
    let truncated = &nar[..nar.len() - 24];
    let index = store_chunked(&fx, truncated, truncated.len() / 2 + 1, 50).await;
    fx.indices
        .put_index(Path::new("c.nar"), &index)
        .await
        .unwrap();

    let stats = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();

    assert!(!fx.index_base.join("c.nar").exists());
    assert_eq!(stats.dead_chunks, 0, "byte-valid chunks stay live");
    for chunk in &index.chunks {
        assert!(chunk_file(&fx.chunk_base, &chunk.id).exists());
    }
}

#[tokio::test]
async fn surviving_indices_reference_only_surviving_chunks() {
    let fx = fixture().await;

    let old_index = store_chunked(&fx, &file_nar(b"old artifact"), 64, 10_000).await;
    fx.indices
        .put_index(Path::new("old.nar"), &old_index)
        .await
        .unwrap();
    let new_index = store_chunked(&fx, &file_nar(b"new artifact"), 64, 10).await;
    fx.indices
        .put_index(Path::new("new.nar"), &new_index)
        .await
        .unwrap();

    let new_total: u64 = new_index
        .chunks
        .iter()
        .map(|c| on_disk_size(&chunk_file(&fx.chunk_base, &c.id)))
        .sum();
    run_gc_pass(&fx.chunks, &fx.indices, new_total).await.unwrap();

    // Every index still on disk loads and references only chunks that
    // are still on disk.
    for entry in std::fs::read_dir(&fx.index_base).unwrap() {
        let entry = entry.unwrap();
        if !entry.file_type().unwrap().is_file() {
            continue;
        }
        let rel = entry.path();
        let rel = rel.strip_prefix(&fx.index_base).unwrap().to_path_buf();
        let index = fx.indices.get_index(&rel).await.unwrap();
        for chunk in &index.chunks {
            assert!(
                chunk_file(&fx.chunk_base, &chunk.id).exists(),
                "{} references missing chunk {}",
                rel.display(),
                chunk.id
            );
        }
    }
    assert!(!fx.index_base.join("old.nar").exists());
    assert!(fx.index_base.join("new.nar").exists());
}

#[tokio::test]
async fn second_pass_on_quiescent_store_deletes_nothing() {
    let fx = fixture().await;

    let index = store_chunked(&fx, &file_nar(b"stable artifact"), 32, 100).await;
    fx.indices
        .put_index(Path::new("stable.nar"), &index)
        .await
        .unwrap();

    let first = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();
    assert_eq!(first.dead_chunks, 0);

    let second = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();
    assert_eq!(second.dead_chunks, 0);
    assert_eq!(second.dead_indices, 0);
    assert_eq!(second.live_chunks, first.live_chunks);
    assert!(fx.index_base.join("stable.nar").exists());
}

#[tokio::test]
async fn aborted_pass_deletes_nothing() {
    let fx = fixture().await;

    // An old unknown-format file is examined and fails to load as an
    // index, aborting the pass.
    let leftover = fx.index_base.join("leftover.dat");
    std::fs::write(&leftover, b"not an index").unwrap();
    set_mtime(&leftover, 3600);

    // This empty index would be deleted by a completed pass.
    fx.indices
        .put_index(Path::new("doomed.narinfo"), &ChunkIndex { chunks: vec![] })
        .await
        .unwrap();

    let result = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET).await;
    assert!(result.is_err());
    assert!(fx.index_base.join("doomed.narinfo").exists());
    assert!(leftover.exists());
}

#[tokio::test]
async fn fresh_unknown_files_are_skipped() {
    let fx = fixture().await;

    // Same garbage content as the abort case, but fresh: skipped entirely.
    let fresh = fx.index_base.join("fresh.dat");
    std::fs::write(&fresh, b"not an index").unwrap();

    let stats = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();
    assert!(fresh.exists());
    assert_eq!(stats.index_count, 0);
}

#[tokio::test]
async fn malformed_chunk_name_aborts_pass_before_deletion() {
    let fx = fixture().await;

    // A chunk-extension file whose stem is not a chunk id.
    std::fs::write(fx.chunk_base.join("nonsense.zst"), b"x").unwrap();

    // This corrupt chunk would be deleted by a completed pass.
    let id = ChunkId::compute(b"expected");
    let corrupt = chunk_file(&fx.chunk_base, &id);
    std::fs::create_dir_all(corrupt.parent().unwrap()).unwrap();
    std::fs::write(&corrupt, b"garbage").unwrap();

    let result = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET).await;
    assert!(result.is_err());
    assert!(corrupt.exists());
}

#[tokio::test]
async fn pass_reports_inflated_size() {
    let fx = fixture().await;

    let nar = file_nar(b"measure me");
    let index = store_chunked(&fx, &nar, 32, 100).await;
    fx.indices
        .put_index(Path::new("m.nar"), &index)
        .await
        .unwrap();

    let stats = run_gc_pass(&fx.chunks, &fx.indices, ROOMY_BUDGET)
        .await
        .unwrap();
    assert_eq!(stats.index_count, 1);
    assert_eq!(stats.inflated_bytes, nar.len() as u64);
}
