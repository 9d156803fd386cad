//! File registry: one persisted [`FileRecord`] per logical upload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::fsutil;
use crate::locks::FileLocks;
use crate::records::{FileRecord, NewFile, ReconstructionResult};
use crate::{FileId, OwnerId, StoreError};

#[derive(Default)]
struct Index {
    records: HashMap<FileId, FileRecord>,
    by_name: HashMap<(OwnerId, String), FileId>,
}

impl Index {
    fn insert(&mut self, record: FileRecord) {
        self.by_name.insert(
            (record.owner_id.clone(), record.declared_name.clone()),
            record.id,
        );
        self.records.insert(record.id, record);
    }

    fn remove(&mut self, file_id: FileId) -> Option<FileRecord> {
        let record = self.records.remove(&file_id)?;
        let key = (record.owner_id.clone(), record.declared_name.clone());
        if self.by_name.get(&key) == Some(&file_id) {
            self.by_name.remove(&key);
        }
        Some(record)
    }
}

/// Source of truth for "is this file done".
///
/// Reads are served from an in-memory index loaded at [`open`](Self::open);
/// every mutation is persisted to `{dir}/{file_id}.json` before it
/// returns. The index mutex is never held across an await. Mutations of
/// the same record are serialized by a private per-file lock so a slow
/// write can never overwrite a newer one or resurrect a deleted record.
pub struct FileRegistry {
    dir: PathBuf,
    index: Mutex<Index>,
    write_locks: FileLocks,
}

impl FileRegistry {
    /// Loads every record found in `dir` (usually `{data_dir}/files`).
    ///
    /// Unreadable records are skipped with a warning rather than
    /// failing startup.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = Index::default();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<FileRecord>(&content) {
                Ok(record) => index.insert(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file record");
                }
            }
        }

        tracing::debug!(records = index.records.len(), dir = %dir.display(), "file registry loaded");
        Ok(Self {
            dir,
            index: Mutex::new(index),
            write_locks: FileLocks::new(),
        })
    }

    /// Returns the directory records are persisted in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, file_id: FileId) -> PathBuf {
        self.dir.join(format!("{file_id}.json"))
    }

    fn index(&self) -> std::sync::MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self, record: &FileRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        fsutil::write_atomic(&self.record_path(record.id), &json).await?;
        Ok(())
    }

    /// Returns a snapshot of the record.
    pub fn get(&self, file_id: FileId) -> Option<FileRecord> {
        self.index().records.get(&file_id).cloned()
    }

    /// Looks a record up by its `(owner, declared_name)` pair.
    pub fn find_by_name(&self, owner_id: &OwnerId, name: &str) -> Option<FileRecord> {
        let index = self.index();
        let id = index.by_name.get(&(owner_id.clone(), name.to_string()))?;
        index.records.get(id).cloned()
    }

    /// Returns the record for `(owner, name)`, creating it if absent.
    ///
    /// Concurrent callers for the same pair all receive the same record;
    /// exactly one of them sees `created == true`.
    pub async fn get_or_create(&self, new: NewFile) -> Result<(FileRecord, bool), StoreError> {
        let record = {
            let mut index = self.index();
            let key = (new.owner_id.clone(), new.declared_name.clone());
            if let Some(existing) = index.by_name.get(&key).and_then(|id| index.records.get(id)) {
                return Ok((existing.clone(), false));
            }
            let record = FileRecord {
                id: FileId::new(),
                owner_id: new.owner_id,
                declared_name: new.declared_name,
                declared_size: new.declared_size,
                declared_chunk_count: new.declared_chunk_count,
                media_type: new.media_type,
                folder_id: new.folder_id,
                is_complete: false,
                created_at: Utc::now(),
                completed_at: None,
                reassembly: None,
            };
            index.insert(record.clone());
            record
        };

        let _guard = self.write_locks.lock(&record.id).await;
        if let Err(e) = self.persist(&record).await {
            self.index().remove(record.id);
            return Err(e);
        }
        tracing::debug!(file_id = %record.id, owner = %record.owner_id, name = %record.declared_name, "file record created");
        Ok((record, true))
    }

    /// Flips `is_complete` to true.
    ///
    /// Returns the updated record and whether this call performed the
    /// transition (`false` if it was already complete).
    pub async fn mark_complete(&self, file_id: FileId) -> Result<(FileRecord, bool), StoreError> {
        let _guard = self.write_locks.lock(&file_id).await;

        let (previous, updated) = {
            let mut index = self.index();
            let record = index
                .records
                .get_mut(&file_id)
                .ok_or(StoreError::FileNotFound(file_id))?;
            if record.is_complete {
                return Ok((record.clone(), false));
            }
            let previous = record.clone();
            record.is_complete = true;
            record.completed_at = Some(Utc::now());
            (previous, record.clone())
        };

        if let Err(e) = self.persist(&updated).await {
            self.index().insert(previous);
            return Err(e);
        }
        Ok((updated, true))
    }

    /// Records the outcome of a reconstruction attempt.
    ///
    /// Returns `false` if the file was deleted in the meantime; the
    /// result is then dropped.
    pub async fn record_reassembly(&self, result: ReconstructionResult) -> Result<bool, StoreError> {
        let file_id = result.file_id;
        let _guard = self.write_locks.lock(&file_id).await;

        let updated = {
            let mut index = self.index();
            let Some(record) = index.records.get_mut(&file_id) else {
                return Ok(false);
            };
            record.reassembly = Some(result);
            record.clone()
        };

        self.persist(&updated).await?;
        Ok(true)
    }

    /// Removes a record from the index and disk.
    pub async fn remove(&self, file_id: FileId) -> Result<Option<FileRecord>, StoreError> {
        let _guard = self.write_locks.lock(&file_id).await;

        let Some(record) = self.index().remove(file_id) else {
            return Ok(None);
        };
        if let Err(e) = fsutil::remove_if_exists(&self.record_path(file_id)).await {
            self.index().insert(record);
            return Err(e.into());
        }
        Ok(Some(record))
    }

    /// Returns an owner's records, oldest first.
    pub fn list_for_owner(&self, owner_id: &OwnerId) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self
            .index()
            .records
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Returns every record, oldest first.
    pub fn all(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.index().records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.index().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
