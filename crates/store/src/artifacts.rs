//! Reconstructed files, one per completed upload.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::fsutil;
use crate::records::FileRecord;
use crate::StoreError;

/// Directory of reconstructed files named `{file_id}-{declared_name}`.
///
/// Artifacts are written through a [`StagedArtifact`] and only appear
/// under their final name once fully written and synced.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of `record`'s artifact.
    pub fn path_for(&self, record: &FileRecord) -> PathBuf {
        self.root.join(record.artifact_file_name())
    }

    /// Opens a staging file next to the artifact's final location.
    pub async fn stage(&self, record: &FileRecord) -> Result<StagedArtifact, StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let target = self.path_for(record);
        let tmp = fsutil::staging_path(&target);
        let file = tokio::fs::File::create(&tmp).await?;
        Ok(StagedArtifact {
            file,
            tmp,
            target,
            written: 0,
        })
    }

    /// Opens a committed artifact for reading. Returns the file and its
    /// size in bytes.
    pub async fn open(&self, record: &FileRecord) -> Result<(tokio::fs::File, u64), StoreError> {
        let file = match tokio::fs::File::open(self.path_for(record)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::FileNotFound(record.id));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    /// Deletes the artifact. Returns whether one existed.
    pub async fn remove(&self, record: &FileRecord) -> Result<bool, StoreError> {
        Ok(fsutil::remove_if_exists(&self.path_for(record)).await?)
    }

    /// Deletes staging files left behind by an interrupted write.
    pub async fn sweep_staging(&self) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if fsutil::is_staging_name(&entry.file_name().to_string_lossy())
                && fsutil::remove_if_exists(&entry.path()).await?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, dir = %self.root.display(), "swept stale artifact staging files");
        }
        Ok(removed)
    }
}

/// An artifact being written. Dropping it without [`commit`](Self::commit)
/// leaves a staging file for [`ArtifactStore::sweep_staging`]; prefer
/// [`discard`](Self::discard).
pub struct StagedArtifact {
    file: tokio::fs::File,
    tmp: PathBuf,
    target: PathBuf,
    written: u64,
}

impl StagedArtifact {
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Syncs the data and moves it to its final name.
    pub async fn commit(mut self) -> Result<PathBuf, StoreError> {
        let result = async {
            self.file.flush().await?;
            self.file.sync_all().await?;
            tokio::fs::rename(&self.tmp, &self.target).await
        }
        .await;

        match result {
            Ok(()) => Ok(self.target),
            Err(e) => {
                let _ = tokio::fs::remove_file(&self.tmp).await;
                Err(e.into())
            }
        }
    }

    /// Removes the staging file.
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = fsutil::remove_if_exists(&self.tmp).await {
            tracing::warn!(path = %self.tmp.display(), error = %e, "failed to remove staging file");
        }
    }
}
