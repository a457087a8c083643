mod cloudinary;
mod content_type;
mod file_storage;
#[cfg(test)]
mod in_memory;
mod keys;
mod local_fs;
mod migrate;
mod object_store;
mod qr_code;
mod reference;

pub use cloudinary::CloudinaryStorage;
pub use content_type::content_type_for;
pub use file_storage::{Download, FileStorage, PLACEHOLDER_IMAGE};
#[cfg(test)]
pub use in_memory::InMemoryStorage;
pub use local_fs::LocalFileStorage;
pub use migrate::MigrationReport;
pub use object_store::ObjectStoreStorage;
pub use reference::StoredReference;

use crate::config::{AppConfig, BackendConfig};
use crate::errors::StorageError;
use async_trait::async_trait;
use mime::Mime;
use std::{fmt, sync::Arc};

#[derive(Debug)]
pub struct FileData {
    pub bytes: Vec<u8>,
    pub content_type: Option<Mime>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    ObjectStore,
    CloudMedia,
    #[cfg(test)]
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStore => "object_store",
            BackendKind::CloudMedia => "cloud_media",
            #[cfg(test)]
            BackendKind::Memory => "memory",
        })
    }
}

/// A physical storage backend.
///
/// `key` passed to [`Storage::put`] is always `<folder>/<token>_<filename>`.
/// The read and delete methods receive every reference the facade sees and
/// must treat ones they do not [`own`](Storage::owns) as absent.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;
    fn owns(&self, reference: &StoredReference) -> bool;
    async fn put(&self, key: &str, file: &FileData) -> Result<StoredReference, StorageError>;
    async fn get(&self, reference: &StoredReference) -> Result<Option<Vec<u8>>, StorageError>;
    async fn exists(&self, reference: &StoredReference) -> Result<bool, StorageError>;
    async fn delete(&self, reference: &StoredReference) -> Result<(), StorageError>;
}

/// Builds the storage component for this process: the configured backend plus
/// the local disk fallback, which is created regardless of the choice.
pub async fn select_backend(config: &AppConfig) -> Result<FileStorage, StorageError> {
    let local = LocalFileStorage::new(config.upload_dir.clone(), config.static_dir.clone())?;
    local.create_folders(keys::KNOWN_FOLDERS).await?;

    let active: Arc<dyn Storage> = match &config.backend {
        BackendConfig::ObjectStore(store) => {
            tracing::info!(endpoint = %store.endpoint, bucket = %store.bucket, "Using object storage");
            Arc::new(ObjectStoreStorage::new(store.clone())?)
        }
        BackendConfig::CloudMedia(cloud) => {
            tracing::info!(cloud_name = %cloud.cloud_name, "Using Cloudinary for permanent storage");
            Arc::new(CloudinaryStorage::new(cloud.clone())?)
        }
        BackendConfig::Local => {
            if config.cloudinary_incomplete {
                tracing::warn!("Cloudinary credentials are incomplete, ignoring them");
            }
            tracing::warn!(
                path = %config.upload_dir.display(),
                "No cloud storage configured, using local disk (files may be lost on rebuild)"
            );
            Arc::new(local.clone())
        }
    };

    FileStorage::new(active, local, config.cloud_marker.clone())
}
