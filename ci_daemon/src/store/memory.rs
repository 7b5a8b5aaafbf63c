//! In-process storage. Used when no database is configured and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::Storage;
use crate::models::build::BuildResult;
use crate::models::owner::{Owner, OwnerKey};

#[derive(Default)]
pub struct MemoryStorage {
    last_id: AtomicI64,
    builds: Mutex<HashMap<i64, BuildResult>>,
    owners: Mutex<HashMap<OwnerKey, Owner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn next_build_id(&self) -> anyhow::Result<i64> {
        Ok(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn put_build(&self, result: &BuildResult) -> anyhow::Result<()> {
        let mut builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        builds.insert(result.id, result.clone());
        Ok(())
    }

    async fn get_build(&self, id: i64) -> anyhow::Result<Option<BuildResult>> {
        let builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        Ok(builds.get(&id).cloned())
    }

    async fn get_owner(&self, key: &OwnerKey) -> anyhow::Result<Option<Owner>> {
        let owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        Ok(owners.get(key).cloned())
    }

    async fn put_owner(&self, owner: &Owner) -> anyhow::Result<()> {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        owners.insert(owner.key.clone(), owner.clone());
        Ok(())
    }
}
