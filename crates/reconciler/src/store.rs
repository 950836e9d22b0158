//! Resource store contract and an in-memory implementation.
//!
//! The store is the only cross-restart shared state. Status writes use
//! optimistic concurrency: a writer presents the resource version it
//! read, and a mismatch is rejected with [`Error::Conflict`] so the
//! whole pass can be retried against fresh state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use capstan_core::{Release, ReleaseId, ReleaseSpec, ReleaseStatus};

use crate::error::{Error, Result};

/// CRUD over release resources with optimistic-concurrency status
/// writes. Watch scoping and transport belong to the embedding runtime.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a release by identity. `None` when it does not exist.
    async fn get(&self, id: &ReleaseId) -> Result<Option<Release>>;

    /// Write status for a release, conditional on `expected_version`
    /// matching the stored resource version. Returns the new version.
    async fn update_status(
        &self,
        id: &ReleaseId,
        expected_version: u64,
        status: ReleaseStatus,
    ) -> Result<u64>;

    /// Add or remove the engine's finalizer hold. Removing the
    /// finalizer from a deletion-requested resource lets the store
    /// garbage-collect it.
    async fn set_finalizer(&self, id: &ReleaseId, present: bool) -> Result<()>;

    /// List known release identities.
    async fn list(&self) -> Result<Vec<ReleaseId>>;
}

/// In-memory resource store for tests and embedding.
#[derive(Default)]
pub struct InMemoryResourceStore {
    releases: RwLock<HashMap<ReleaseId, Release>>,
}

impl InMemoryResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Apply a spec the way a user edit would: create the resource or
    /// replace its spec, bumping generation and resource version.
    pub async fn apply_spec(&self, id: ReleaseId, spec: ReleaseSpec) -> Release {
        let mut releases = self.releases.write().await;
        match releases.get_mut(&id) {
            Some(existing) => {
                let generation = existing.spec.generation + 1;
                existing.spec = spec;
                existing.spec.generation = generation;
                existing.resource_version += 1;
                existing.clone()
            }
            None => {
                let release = Release::new(id.clone(), spec);
                releases.insert(id, release.clone());
                release
            }
        }
    }

    /// Mark a resource as deletion-requested, as a user delete would.
    pub async fn request_deletion(&self, id: &ReleaseId) -> Result<()> {
        let mut releases = self.releases.write().await;
        let release = releases
            .get_mut(id)
            .ok_or_else(|| Error::store_failed(format!("release '{id}' not found")))?;
        release.deletion_requested = true;
        release.resource_version += 1;
        // No finalizer hold means nothing blocks collection.
        if !release.finalizer {
            releases.remove(id);
        }
        Ok(())
    }

    /// Whether the resource still exists.
    pub async fn exists(&self, id: &ReleaseId) -> bool {
        self.releases.read().await.contains_key(id)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, id: &ReleaseId) -> Result<Option<Release>> {
        Ok(self.releases.read().await.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &ReleaseId,
        expected_version: u64,
        status: ReleaseStatus,
    ) -> Result<u64> {
        let mut releases = self.releases.write().await;
        let release = releases
            .get_mut(id)
            .ok_or_else(|| Error::store_failed(format!("release '{id}' not found")))?;
        if release.resource_version != expected_version {
            return Err(Error::Conflict {
                release: id.to_string(),
            });
        }
        release.status = status;
        release.resource_version += 1;
        Ok(release.resource_version)
    }

    async fn set_finalizer(&self, id: &ReleaseId, present: bool) -> Result<()> {
        let mut releases = self.releases.write().await;
        let release = releases
            .get_mut(id)
            .ok_or_else(|| Error::store_failed(format!("release '{id}' not found")))?;
        release.finalizer = present;
        release.resource_version += 1;
        if !present && release.deletion_requested {
            releases.remove(id);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ReleaseId>> {
        let mut ids: Vec<_> = self.releases.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
