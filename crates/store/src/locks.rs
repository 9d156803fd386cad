//! Keyed advisory locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{FileId, OwnerId};

/// Map size above which dead entries are pruned on the next lookup.
const PRUNE_THRESHOLD: usize = 256;

/// Hands out one async mutex per key.
///
/// Entries are weak: once no task holds or waits on a key's lock, the
/// entry is dropped at the next prune. Locks from different instances
/// are unrelated.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

/// Serializes the lifecycle transitions of one file.
pub type FileLocks = KeyedLocks<FileId>;

/// Serializes the quota updates of one owner.
pub type OwnerLocks = KeyedLocks<OwnerId>;

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() >= PRUNE_THRESHOLD {
                map.retain(|_, weak| weak.strong_count() > 0);
            }
            match map.get(key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(AsyncMutex::new(()));
                    map.insert(key.clone(), Arc::downgrade(&fresh));
                    fresh
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Number of map entries (live or not yet pruned).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_file_is_exclusive() {
        let locks = Arc::new(FileLocks::new());
        let id = FileId::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_files_do_not_block() {
        let locks = FileLocks::new();
        let _a = locks.lock(&FileId::new()).await;
        // Would hang forever if locks were shared across ids.
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(&FileId::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = FileLocks::new();
        for _ in 0..(PRUNE_THRESHOLD + 10) {
            let _g = locks.lock(&FileId::new()).await;
        }
        // The prune ran once the threshold was crossed.
        assert!(locks.len() < PRUNE_THRESHOLD + 10);
    }

    #[tokio::test]
    async fn owner_keys_lock_independently() {
        let locks = OwnerLocks::new();
        let _alice = locks.lock(&OwnerId::new("alice")).await;
        let bob = tokio::time::timeout(Duration::from_secs(1), locks.lock(&OwnerId::new("bob"))).await;
        assert!(bob.is_ok());
        let again =
            tokio::time::timeout(Duration::from_millis(50), locks.lock(&OwnerId::new("alice"))).await;
        assert!(again.is_err());
    }
}
