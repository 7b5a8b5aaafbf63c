//! Durable storage for build results and owner records.
//!
//! [`Storage`] is the raw key-value backend. [`EntityStore`] layers per-owner
//! locking on top so reconciliation never interleaves two updates of the same
//! user or group.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::CiError;
use crate::models::build::BuildResult;
use crate::models::owner::{Owner, OwnerKey};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable backend name (e.g. "memory", "postgres").
    fn backend_name(&self) -> &'static str;

    /// Allocate a fresh build result id. Ids are never reused.
    async fn next_build_id(&self) -> anyhow::Result<i64>;

    /// Insert or replace a build result under its id.
    async fn put_build(&self, result: &BuildResult) -> anyhow::Result<()>;

    async fn get_build(&self, id: i64) -> anyhow::Result<Option<BuildResult>>;

    async fn get_owner(&self, key: &OwnerKey) -> anyhow::Result<Option<Owner>>;

    async fn put_owner(&self, owner: &Owner) -> anyhow::Result<()>;
}

/// Owner records behind per-key locks.
pub struct EntityStore {
    storage: Arc<dyn Storage>,
    locks: Mutex<HashMap<OwnerKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn lock_for(&self, key: &OwnerKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    /// Drop the lock entry for `key` once nobody holds or waits on it.
    fn release_lock(&self, key: &OwnerKey) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    /// Lock the owner and load it (or a fresh record). The lock is held
    /// until the guard is saved or dropped.
    pub async fn lock_owner(&self, key: &OwnerKey) -> Result<OwnerGuard<'_>, CiError> {
        let lock = self.lock_for(key).lock_owned().await;
        let mut guard = OwnerGuard {
            store: self,
            key: key.clone(),
            owner: Owner::new(key.clone()),
            lock: Some(lock),
        };

        if let Some(owner) = self
            .storage
            .get_owner(key)
            .await
            .map_err(|e| CiError::storage("get_owner", e))?
        {
            guard.owner = owner;
        }
        Ok(guard)
    }

    /// Load (or create) the owner, apply `f`, and save it, holding the
    /// owner's lock for the whole sequence. The lock is released on every
    /// exit path, including a failed save.
    pub async fn with_owner<F, T>(&self, key: &OwnerKey, f: F) -> Result<T, CiError>
    where
        F: FnOnce(&mut Owner) -> T,
    {
        let mut guard = self.lock_owner(key).await?;
        let out = f(guard.owner_mut());
        guard.save().await?;
        Ok(out)
    }

    /// Read-only snapshot of an owner.
    pub async fn owner(&self, key: &OwnerKey) -> Result<Option<Owner>, CiError> {
        self.storage
            .get_owner(key)
            .await
            .map_err(|e| CiError::storage("get_owner", e))
    }

    pub async fn build(&self, id: i64) -> Result<Option<BuildResult>, CiError> {
        self.storage
            .get_build(id)
            .await
            .map_err(|e| CiError::storage("get_build", e))
    }
}

/// A loaded owner whose lock is held. Dropping the guard without saving
/// discards the changes.
pub struct OwnerGuard<'a> {
    store: &'a EntityStore,
    key: OwnerKey,
    owner: Owner,
    lock: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl OwnerGuard<'_> {
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut Owner {
        &mut self.owner
    }

    /// Persist the owner and release the lock.
    pub async fn save(self) -> Result<(), CiError> {
        self.store
            .storage
            .put_owner(&self.owner)
            .await
            .map_err(|e| CiError::storage("put_owner", e))
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.store.release_lock(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_owner_creates_and_persists() {
        let store = EntityStore::new(Arc::new(MemoryStorage::new()));
        let key = OwnerKey::user("alice");

        let prev = store
            .with_owner(&key, |o| {
                let prev = o.last_build_id("cs101", 1);
                o.add_build_result("cs101", 1, 5);
                prev
            })
            .await
            .unwrap();
        assert_eq!(prev, crate::models::owner::NO_BUILD);

        let owner = store.owner(&key).await.unwrap().unwrap();
        assert_eq!(owner.last_build_id("cs101", 1), 5);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(EntityStore::new(Arc::new(MemoryStorage::new())));
        let key = OwnerKey::group("cs101", 2);

        let mut handles = Vec::new();
        for id in 1..=20 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .with_owner(&key, |o| o.add_build_result("cs101", 1, id))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let owner = store.owner(&key).await.unwrap().unwrap();
        let builds = &owner.assignment("cs101", 1).unwrap().builds;
        assert_eq!(builds.len(), 20);
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_accumulate() {
        let store = EntityStore::new(Arc::new(MemoryStorage::new()));
        for i in 0..50 {
            let key = OwnerKey::user(&format!("student{i}"));
            store
                .with_owner(&key, |o| o.add_build_result("cs101", 1, i))
                .await
                .unwrap();
            let guard = store.lock_owner(&key).await.unwrap();
            assert_eq!(store.locks.lock().unwrap().len(), 1);
            drop(guard);
        }
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_closure_path() {
        let store = Arc::new(EntityStore::new(Arc::new(MemoryStorage::new())));
        let key = OwnerKey::user("carol");

        let s = store.clone();
        let k = key.clone();
        let panicked = tokio::spawn(async move {
            s.with_owner(&k, |_o| -> () { panic!("fault inside reconciliation") })
                .await
                .ok();
        })
        .await;
        assert!(panicked.is_err());

        // The guard was dropped during unwinding, so this does not deadlock.
        let res = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            store.with_owner(&key, |o| o.add_build_result("cs101", 1, 1)),
        )
        .await;
        assert!(matches!(res, Ok(Ok(()))));
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_guard_discards_changes() {
        let store = EntityStore::new(Arc::new(MemoryStorage::new()));
        let key = OwnerKey::user("dave");

        {
            let mut guard = store.lock_owner(&key).await.unwrap();
            guard.owner_mut().add_build_result("cs101", 1, 9);
        }

        assert!(store.owner(&key).await.unwrap().is_none());
        let guard = store.lock_owner(&key).await.unwrap();
        assert_eq!(guard.owner().last_build_id("cs101", 1), crate::models::owner::NO_BUILD);
    }
}
