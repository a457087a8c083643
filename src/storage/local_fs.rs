use super::*;
use std::path::{Path, PathBuf};
use tokio::fs;

const LEGACY_PREFIX: &str = "uploads/";

/// Uploads directory on local disk. Also answers lookups for references
/// written by older layouts, which live under the static directory or carry
/// a redundant `uploads/` prefix.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    upload_dir: PathBuf,
    static_dir: PathBuf,
}

impl LocalFileStorage {
    pub fn new(upload_dir: PathBuf, static_dir: PathBuf) -> Result<Self, StorageError> {
        if !upload_dir.exists() {
            std::fs::create_dir_all(&upload_dir)?;
        }
        Ok(Self {
            upload_dir,
            static_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    pub async fn create_folders(&self, folders: &[&str]) -> Result<(), StorageError> {
        for folder in folders {
            fs::create_dir_all(self.upload_dir.join(folder)).await?;
        }
        Ok(())
    }

    // Search order: literal, under the static dir, legacy prefix stripped.
    fn candidates(&self, path: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.upload_dir.join(path), self.static_dir.join(path)];
        if let Some(stripped) = path.strip_prefix(LEGACY_PREFIX) {
            paths.push(self.upload_dir.join(stripped));
        }
        paths
    }

    async fn locate(&self, reference: &StoredReference) -> Result<Option<PathBuf>, StorageError> {
        let StoredReference::Local(path) = reference else {
            return Ok(None);
        };
        check_relative(path)?;

        for candidate in self.candidates(path) {
            if fs::metadata(&candidate)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false)
            {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

fn check_relative(key: &str) -> Result<(), StorageError> {
    if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidReference(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Storage for LocalFileStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn owns(&self, reference: &StoredReference) -> bool {
        reference.is_local()
    }

    async fn put(&self, key: &str, file: &FileData) -> Result<StoredReference, StorageError> {
        check_relative(key)?;
        let file_path = self.upload_dir.join(key);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let partial = file_path.with_extension(format!("part-{}", keys::unique_token()));
        let written = match fs::write(&partial, &file.bytes).await {
            Ok(()) => fs::rename(&partial, &file_path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }

        tracing::info!(
            path = %file_path.display(),
            key = %key,
            size_bytes = file.bytes.len(),
            "File saved to local storage"
        );

        Ok(StoredReference::Local(key.to_string()))
    }

    async fn get(&self, reference: &StoredReference) -> Result<Option<Vec<u8>>, StorageError> {
        match self.locate(reference).await? {
            Some(path) => Ok(Some(fs::read(&path).await?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, reference: &StoredReference) -> Result<bool, StorageError> {
        Ok(self.locate(reference).await?.is_some())
    }

    async fn delete(&self, reference: &StoredReference) -> Result<(), StorageError> {
        match self.locate(reference).await? {
            Some(path) => {
                fs::remove_file(&path).await?;
                tracing::info!(path = %path.display(), "File deleted from local storage");
            }
            None => tracing::debug!(reference = %reference, "File not found for deletion"),
        }
        Ok(())
    }
}
