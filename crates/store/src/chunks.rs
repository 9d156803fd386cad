//! Chunk storage keyed by `(file_id, sequence_number)`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::fsutil;
use crate::records::ChunkRecord;
use crate::{FileId, StoreError};

/// A boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Lazy, finite stream of chunks in ascending sequence order.
///
/// The set of sequence numbers is fixed when the stream is opened;
/// payloads are read one at a time as the stream is polled. A chunk
/// deleted after opening surfaces as an I/O error.
pub type ChunkStream = BoxStream<'static, Result<ChunkRecord, StoreError>>;

/// Durable keyed storage of raw chunk bytes.
///
/// No ordering or completeness logic lives here: callers decide what a
/// gap means.
pub trait ChunkStore: Send + Sync + 'static {
    /// Stores `payload` at `(file_id, sequence_number)`, replacing any
    /// previous payload for that slot.
    fn put<'a>(
        &'a self,
        file_id: FileId,
        sequence_number: u32,
        payload: &'a [u8],
    ) -> StoreFuture<'a, ()>;

    /// Opens an ordered stream over every stored chunk of `file_id`.
    fn get_ordered(&self, file_id: FileId) -> StoreFuture<'_, ChunkStream>;

    /// Returns the stored sequence numbers of `file_id`, ascending.
    fn sequences(&self, file_id: FileId) -> StoreFuture<'_, Vec<u32>>;

    /// Removes every chunk of `file_id`. Returns how many were removed.
    fn delete_all(&self, file_id: FileId) -> StoreFuture<'_, usize>;

    /// When the most recent chunk of `file_id` was stored, or `None` if
    /// it has no chunks.
    fn last_write(&self, file_id: FileId) -> StoreFuture<'_, Option<DateTime<Utc>>>;
}

/// Extension of chunk payload files.
const CHUNK_EXT: &str = "chunk";

/// [`ChunkStore`] backed by one file per chunk:
/// `{root}/{file_id}/{sequence:010}.chunk`.
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Creates a store rooted at `root` (usually `{data_dir}/chunks`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_dir(&self, file_id: FileId) -> PathBuf {
        self.root.join(file_id.to_string())
    }
}

fn chunk_file_name(sequence_number: u32) -> String {
    format!("{sequence_number:010}.{CHUNK_EXT}")
}

/// Parses `0000000003.chunk` back into `3`. Staging files and strays
/// yield `None`.
fn parse_chunk_file_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(CHUNK_EXT)?.strip_suffix('.')?;
    if stem.len() != 10 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

async fn list_sequences(dir: &Path) -> Result<Vec<u32>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut seqs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(seq) = parse_chunk_file_name(&name.to_string_lossy()) {
            seqs.push(seq);
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

async fn newest_chunk_time(dir: &Path) -> Result<Option<DateTime<Utc>>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut newest = None;
    while let Some(entry) = entries.next_entry().await? {
        if parse_chunk_file_name(&entry.file_name().to_string_lossy()).is_none() {
            continue;
        }
        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(t) => DateTime::<Utc>::from(t),
            // Deleted between listing and stat.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        newest = newest.max(Some(modified));
    }
    Ok(newest)
}

async fn read_chunk(file_id: FileId, sequence_number: u32, path: PathBuf) -> Result<ChunkRecord, StoreError> {
    let payload = tokio::fs::read(&path).await?;
    let received_at = tokio::fs::metadata(&path)
        .await?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(ChunkRecord {
        file_id,
        sequence_number,
        payload,
        received_at,
    })
}

impl ChunkStore for FsChunkStore {
    fn put<'a>(
        &'a self,
        file_id: FileId,
        sequence_number: u32,
        payload: &'a [u8],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.file_dir(file_id).join(chunk_file_name(sequence_number));
            fsutil::write_atomic(&path, payload).await?;
            tracing::trace!(%file_id, sequence_number, bytes = payload.len(), "chunk stored");
            Ok(())
        })
    }

    fn get_ordered(&self, file_id: FileId) -> StoreFuture<'_, ChunkStream> {
        Box::pin(async move {
            let dir = self.file_dir(file_id);
            let seqs = list_sequences(&dir).await?;
            let chunks = stream::iter(seqs)
                .then(move |seq| read_chunk(file_id, seq, dir.join(chunk_file_name(seq))))
                .boxed();
            Ok(chunks)
        })
    }

    fn sequences(&self, file_id: FileId) -> StoreFuture<'_, Vec<u32>> {
        Box::pin(async move { list_sequences(&self.file_dir(file_id)).await })
    }

    fn delete_all(&self, file_id: FileId) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let dir = self.file_dir(file_id);
            let count = list_sequences(&dir).await?.len();
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            Ok(count)
        })
    }

    fn last_write(&self, file_id: FileId) -> StoreFuture<'_, Option<DateTime<Utc>>> {
        Box::pin(async move { newest_chunk_time(&self.file_dir(file_id)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsChunkStore) {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path().join("chunks"));
        (dir, store)
    }

    async fn collect(store: &FsChunkStore, id: FileId) -> Vec<ChunkRecord> {
        store
            .get_ordered(id)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[test]
    fn chunk_file_names_roundtrip() {
        assert_eq!(chunk_file_name(3), "0000000003.chunk");
        assert_eq!(parse_chunk_file_name("0000000003.chunk"), Some(3));
        assert_eq!(parse_chunk_file_name(&chunk_file_name(u32::MAX)), Some(u32::MAX));
    }

    #[test]
    fn parse_ignores_strays() {
        assert_eq!(parse_chunk_file_name("3.chunk"), None);
        assert_eq!(parse_chunk_file_name(".0000000003.chunk.tmp-abc"), None);
        assert_eq!(parse_chunk_file_name("000000000x.chunk"), None);
        assert_eq!(parse_chunk_file_name("notes.txt"), None);
    }

    #[tokio::test]
    async fn out_of_order_puts_read_back_in_order() {
        let (_dir, store) = store();
        let id = FileId::new();

        store.put(id, 2, b"CC").await.unwrap();
        store.put(id, 0, b"AA").await.unwrap();
        store.put(id, 1, b"BB").await.unwrap();

        let chunks = collect(&store, id).await;
        let seqs: Vec<u32> = chunks.iter().map(|c| c.sequence_number).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        let bytes: Vec<u8> = chunks.into_iter().flat_map(|c| c.payload).collect();
        assert_eq!(bytes, b"AABBCC");
    }

    #[tokio::test]
    async fn put_same_slot_overwrites() {
        let (_dir, store) = store();
        let id = FileId::new();

        store.put(id, 0, b"first").await.unwrap();
        store.put(id, 0, b"second").await.unwrap();

        let chunks = collect(&store, id).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].payload, b"second");
        assert_eq!(store.sequences(id).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn gaps_are_not_detected_here() {
        let (_dir, store) = store();
        let id = FileId::new();
        store.put(id, 0, b"a").await.unwrap();
        store.put(id, 4, b"e").await.unwrap();
        assert_eq!(store.sequences(id).await.unwrap(), vec![0, 4]);
    }

    #[tokio::test]
    async fn unknown_file_is_empty() {
        let (_dir, store) = store();
        let id = FileId::new();
        assert!(store.sequences(id).await.unwrap().is_empty());
        assert!(collect(&store, id).await.is_empty());
        assert_eq!(store.delete_all(id).await.unwrap(), 0);
        assert_eq!(store.last_write(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_write_follows_newest_chunk() {
        let (_dir, store) = store();
        let id = FileId::new();
        let before = Utc::now() - chrono::TimeDelta::seconds(5);

        store.put(id, 0, b"a").await.unwrap();
        let first = store.last_write(id).await.unwrap().unwrap();
        assert!(first >= before);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.put(id, 1, b"b").await.unwrap();
        let second = store.last_write(id).await.unwrap().unwrap();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn delete_all_removes_only_that_file() {
        let (_dir, store) = store();
        let a = FileId::new();
        let b = FileId::new();
        store.put(a, 0, b"a0").await.unwrap();
        store.put(a, 1, b"a1").await.unwrap();
        store.put(b, 0, b"b0").await.unwrap();

        assert_eq!(store.delete_all(a).await.unwrap(), 2);
        assert!(store.sequences(a).await.unwrap().is_empty());
        assert_eq!(store.sequences(b).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn concurrent_puts_leave_one_record_per_slot() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        let id = FileId::new();

        let mut handles = Vec::new();
        for round in 0..4u8 {
            for seq in 0..8u32 {
                let store = std::sync::Arc::clone(&store);
                handles.push(tokio::spawn(async move {
                    store.put(id, seq, &[round; 16]).await.unwrap();
                }));
            }
        }
        for h in handles {
            h.await.unwrap();
        }

        let seqs = store.sequences(id).await.unwrap();
        assert_eq!(seqs, (0..8).collect::<Vec<_>>());
        for chunk in collect(&store, id).await {
            assert_eq!(chunk.payload.len(), 16);
            // Whole payload comes from a single writer.
            assert!(chunk.payload.iter().all(|b| *b == chunk.payload[0]));
        }
    }
}
