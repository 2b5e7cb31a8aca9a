//! Overflow blob store for externalized `output`/`error` fields (§4.5).
//! The object store proper is an external collaborator (§1); only its
//! interface is specified here, plus a file-backed implementation and an
//! in-memory test double.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Deterministic key for an externalized field, derived from the
/// evaluation id (§4.5 "a deterministic key derived from `id`").
pub fn externalized_key(evaluation_id: &str, field: &str) -> String {
    format!("{evaluation_id}/{field}")
}

pub struct FileObjectStore {
    base_dir: PathBuf,
}

impl FileObjectStore {
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        // Keys are `{evaluation_id}/{field}`; flatten the separator so a
        // single directory holds all objects without nested creation.
        self.base_dir.join(key.replace('/', "__"))
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        tokio::fs::write(self.path(key), bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trips() {
        let store = InMemoryObjectStore::new();
        let key = externalized_key("eval-1", "output");
        store.put(&key, b"hello world".to_vec()).await.unwrap();
        assert_eq!(
            store.get(&key).await.unwrap(),
            Some(b"hello world".to_vec())
        );
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
