use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use chunkdrop_store::OwnerId;

/// Future returned by [`FolderDirectory::folder_exists`].
pub type FolderFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Answers whether a folder exists for an owner.
///
/// Folder management lives outside chunkdrop; uploads naming an unknown
/// folder are stored without a folder association.
pub trait FolderDirectory: Send + Sync + 'static {
    fn folder_exists<'a>(&'a self, owner_id: &'a OwnerId, folder_id: &'a str) -> FolderFuture<'a>;
}

/// Accepts every folder id.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyFolder;

impl FolderDirectory for AnyFolder {
    fn folder_exists<'a>(&'a self, _owner_id: &'a OwnerId, _folder_id: &'a str) -> FolderFuture<'a> {
        Box::pin(async { true })
    }
}

/// Fixed per-owner folder table.
#[derive(Debug, Default, Clone)]
pub struct StaticFolders {
    folders: HashMap<OwnerId, HashSet<String>>,
}

impl StaticFolders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, owner_id: OwnerId, folder_id: impl Into<String>) {
        self.folders.entry(owner_id).or_default().insert(folder_id.into());
    }
}

impl FolderDirectory for StaticFolders {
    fn folder_exists<'a>(&'a self, owner_id: &'a OwnerId, folder_id: &'a str) -> FolderFuture<'a> {
        let exists = self
            .folders
            .get(owner_id)
            .is_some_and(|set| set.contains(folder_id));
        Box::pin(async move { exists })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_folders_are_per_owner() {
        let mut folders = StaticFolders::new();
        folders.insert(OwnerId::new("alice"), "docs");

        assert!(folders.folder_exists(&OwnerId::new("alice"), "docs").await);
        assert!(!folders.folder_exists(&OwnerId::new("alice"), "music").await);
        assert!(!folders.folder_exists(&OwnerId::new("bob"), "docs").await);
    }

    #[tokio::test]
    async fn any_folder_accepts_everything() {
        assert!(AnyFolder.folder_exists(&OwnerId::new("x"), "whatever").await);
    }
}
