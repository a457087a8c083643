use super::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Object-store stand-in for tests. Keys map straight to `Local` references.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn owns(&self, reference: &StoredReference) -> bool {
        reference.is_local()
    }

    async fn put(&self, key: &str, file: &FileData) -> Result<StoredReference, StorageError> {
        self.files
            .write()
            .await
            .insert(key.to_string(), file.bytes.clone());
        Ok(StoredReference::Local(key.to_string()))
    }

    async fn get(&self, reference: &StoredReference) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.files.read().await.get(reference.as_str()).cloned())
    }

    async fn exists(&self, reference: &StoredReference) -> Result<bool, StorageError> {
        Ok(self.files.read().await.contains_key(reference.as_str()))
    }

    async fn delete(&self, reference: &StoredReference) -> Result<(), StorageError> {
        self.files.write().await.remove(reference.as_str());
        Ok(())
    }
}
