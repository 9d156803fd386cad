//! Per-owner storage accounting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::fsutil;
use crate::locks::OwnerLocks;
use crate::records::QuotaState;
use crate::{OwnerId, StoreError};

/// Space granted to an owner that has no explicit limit (500 MiB).
pub const DEFAULT_MAX_SPACE: u64 = 524_288_000;

const ACCOUNT_EXT: &str = ".json";

/// Result of a quota update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaChange {
    pub before: QuotaState,
    pub after: QuotaState,
}

impl QuotaChange {
    /// Returns `true` if the owner is over their limit after the change.
    pub fn over_quota(&self) -> bool {
        self.after.is_over()
    }
}

/// Tracks `used_space` per owner.
///
/// Accounts are created lazily with the configured default limit. Each
/// owner has its own lock, held from read to persist, so one owner's
/// updates apply strictly one after the other while different owners
/// never wait on each other. Exceeding the limit is logged and
/// reported, never refused.
pub struct QuotaAccountant {
    dir: PathBuf,
    default_max_space: u64,
    accounts: Mutex<HashMap<OwnerId, QuotaState>>,
    locks: OwnerLocks,
}

impl QuotaAccountant {
    /// Opens the accountant over `dir` (usually `{data_dir}/quota`).
    pub async fn open(dir: impl Into<PathBuf>, default_max_space: u64) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            default_max_space,
            accounts: Mutex::new(HashMap::new()),
            locks: OwnerLocks::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_max_space(&self) -> u64 {
        self.default_max_space
    }

    fn account_path(&self, owner_id: &OwnerId) -> PathBuf {
        self.dir
            .join(format!("{}{ACCOUNT_EXT}", hex::encode(owner_id.as_str())))
    }

    fn cached(&self, owner_id: &OwnerId) -> Option<QuotaState> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.get(owner_id).copied()
    }

    fn cache(&self, owner_id: &OwnerId, state: QuotaState) {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.insert(owner_id.clone(), state);
    }

    /// Reads the owner's state. Caller holds the owner's lock.
    async fn load(&self, owner_id: &OwnerId) -> Result<QuotaState, StoreError> {
        if let Some(state) = self.cached(owner_id) {
            return Ok(state);
        }
        let state = match tokio::fs::read(self.account_path(owner_id)).await {
            Ok(content) => serde_json::from_slice(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QuotaState {
                used_space: 0,
                max_space: self.default_max_space,
            },
            Err(e) => return Err(e.into()),
        };
        self.cache(owner_id, state);
        Ok(state)
    }

    /// Persists then caches. Caller holds the owner's lock.
    async fn store(&self, owner_id: &OwnerId, state: QuotaState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&state)?;
        fsutil::write_atomic(&self.account_path(owner_id), &json).await?;
        self.cache(owner_id, state);
        Ok(())
    }

    /// Applies `f` to the owner's state and persists the result.
    async fn update(
        &self,
        owner_id: &OwnerId,
        f: impl FnOnce(QuotaState) -> QuotaState,
    ) -> Result<QuotaChange, StoreError> {
        let _guard = self.locks.lock(owner_id).await;
        let before = self.load(owner_id).await?;
        let after = f(before);
        if after != before {
            self.store(owner_id, after).await?;
        }
        Ok(QuotaChange { before, after })
    }

    /// Returns the owner's current state.
    pub async fn snapshot(&self, owner_id: &OwnerId) -> Result<QuotaState, StoreError> {
        let _guard = self.locks.lock(owner_id).await;
        self.load(owner_id).await
    }

    /// Adds `amount` to the owner's used space.
    pub async fn reserve_on_completion(
        &self,
        owner_id: &OwnerId,
        amount: u64,
    ) -> Result<QuotaChange, StoreError> {
        let change = self
            .update(owner_id, |before| QuotaState {
                used_space: before.used_space.saturating_add(amount),
                ..before
            })
            .await?;
        if change.over_quota() {
            tracing::warn!(
                owner = %owner_id,
                used_space = change.after.used_space,
                max_space = change.after.max_space,
                "owner is over quota"
            );
        }
        Ok(change)
    }

    /// Subtracts `amount` from the owner's used space, floored at zero.
    pub async fn release_on_deletion(
        &self,
        owner_id: &OwnerId,
        amount: u64,
    ) -> Result<QuotaChange, StoreError> {
        self.update(owner_id, |before| {
            if amount > before.used_space {
                tracing::debug!(
                    owner = %owner_id,
                    used_space = before.used_space,
                    amount,
                    "release exceeds used space, clamping to zero"
                );
            }
            QuotaState {
                used_space: before.used_space.saturating_sub(amount),
                ..before
            }
        })
        .await
    }

    /// Overrides the owner's limit.
    pub async fn set_max_space(
        &self,
        owner_id: &OwnerId,
        max_space: u64,
    ) -> Result<QuotaState, StoreError> {
        let change = self
            .update(owner_id, |before| QuotaState { max_space, ..before })
            .await?;
        Ok(change.after)
    }

    /// Forces the owner's used space to `used_space`. Returns the change
    /// when the stored value differed.
    pub async fn reconcile(
        &self,
        owner_id: &OwnerId,
        used_space: u64,
    ) -> Result<Option<QuotaChange>, StoreError> {
        let change = self
            .update(owner_id, |before| QuotaState { used_space, ..before })
            .await?;
        if change.before == change.after {
            return Ok(None);
        }
        tracing::warn!(
            owner = %owner_id,
            recorded = change.before.used_space,
            actual = used_space,
            "quota out of sync, corrected"
        );
        Ok(Some(change))
    }

    /// Owners that have a persisted account.
    pub async fn known_owners(&self) -> Result<Vec<OwnerId>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut owners = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(ACCOUNT_EXT)) else {
                continue;
            };
            match hex::decode(stem).ok().and_then(|raw| String::from_utf8(raw).ok()) {
                Some(owner) => owners.push(OwnerId::new(owner)),
                None => tracing::debug!(file = stem, "skipping stray quota file"),
            }
        }
        owners.sort();
        Ok(owners)
    }
}
