//! Artifact storage. The engine keeps references; bytes live here.
use async_trait::async_trait;
use dashmap::DashMap;
use reportgen_core::{Artifact, ArtifactId, Result};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, artifact: Artifact) -> Result<()>;
    async fn get(&self, id: &ArtifactId) -> Result<Option<Artifact>>;
    /// Returns whether an artifact was stored under `id`.
    async fn remove(&self, id: &ArtifactId) -> Result<bool>;
}

/// Process-local store, the default.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    artifacts: DashMap<ArtifactId, Artifact>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, artifact: Artifact) -> Result<()> {
        self.artifacts.insert(artifact.id, artifact);
        Ok(())
    }

    async fn get(&self, id: &ArtifactId) -> Result<Option<Artifact>> {
        Ok(self.artifacts.get(id).map(|a| a.value().clone()))
    }

    async fn remove(&self, id: &ArtifactId) -> Result<bool> {
        Ok(self.artifacts.remove(id).is_some())
    }
}
