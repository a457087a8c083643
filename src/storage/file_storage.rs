use super::*;
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub const PLACEHOLDER_IMAGE: &str = "/static/images/default-placeholder.svg";

/// Outcome of resolving a reference to bytes.
#[derive(Debug)]
pub enum Download {
    Found {
        bytes: Vec<u8>,
        content_type: &'static str,
    },
    NotFound,
    /// The reference was refused before any backend was consulted.
    Rejected,
}

impl Download {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Download::Found { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

/// The storage component routes talk to.
///
/// Holds the backend chosen at start-up plus the local disk, which stays
/// reachable for references written before the active backend changed. Every
/// method resolves backend errors here, so callers only ever see `Option`,
/// `bool` or [`Download`].
#[derive(Clone)]
pub struct FileStorage {
    active: Arc<dyn Storage>,
    local: LocalFileStorage,
    client: Client,
    cloud_marker: String,
}

impl FileStorage {
    pub fn new(
        active: Arc<dyn Storage>,
        local: LocalFileStorage,
        cloud_marker: String,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            active,
            local,
            client,
            cloud_marker,
        })
    }

    pub fn active_kind(&self) -> BackendKind {
        self.active.kind()
    }

    pub(super) fn active(&self) -> &Arc<dyn Storage> {
        &self.active
    }

    pub(super) fn local(&self) -> &LocalFileStorage {
        &self.local
    }

    pub fn classify(&self, raw: &str) -> Result<StoredReference, StorageError> {
        StoredReference::classify(raw, &self.cloud_marker)
    }

    /// Stores `file` under `<folder>/<token>_<filename>` on the active backend.
    ///
    /// Returns `None` when the file has no usable name or the backend fails;
    /// the caller decides whether that blocks the surrounding save.
    pub async fn upload(&self, file: &FileData, folder: &str) -> Option<StoredReference> {
        let Some(original) = file.filename.as_deref().filter(|name| !name.is_empty()) else {
            tracing::debug!("Upload skipped: no file supplied");
            return None;
        };
        let Some(filename) = keys::sanitize_filename(original) else {
            tracing::warn!(filename = %original, "Upload rejected: filename has no safe characters");
            return None;
        };

        let folder = keys::normalize_folder(folder);
        let key = keys::unique_key(&folder, &filename);

        match self.active.put(&key, file).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::error!(
                    backend = %self.active.kind(),
                    key = %key,
                    error = %e,
                    "Upload failed"
                );
                None
            }
        }
    }

    pub async fn download(&self, reference: &str) -> Download {
        let reference = match self.classify(reference) {
            Ok(reference) => reference,
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "Download rejected");
                return Download::Rejected;
            }
        };

        match self.read(&reference).await {
            Ok(Some(bytes)) => Download::Found {
                content_type: content_type_for(reference.file_name()),
                bytes,
            },
            Ok(None) => Download::NotFound,
            Err(e) => {
                tracing::error!(reference = %reference, error = %e, "Download failed");
                Download::NotFound
            }
        }
    }

    async fn read(&self, reference: &StoredReference) -> Result<Option<Vec<u8>>, StorageError> {
        let owned = self.active.owns(reference);
        if owned {
            match self.active.get(reference).await {
                Ok(Some(bytes)) => return Ok(Some(bytes)),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    backend = %self.active.kind(),
                    reference = %reference,
                    error = %e,
                    "Active backend read failed, trying fallback"
                ),
            }
        }

        match reference {
            StoredReference::Local(_) if self.active.kind() != BackendKind::Local => {
                self.local.get(reference).await
            }
            StoredReference::Cloud(url) | StoredReference::External(url) if !owned => {
                self.fetch_url(url).await
            }
            _ => Ok(None),
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StorageError::Backend {
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    pub async fn exists(&self, reference: &str) -> bool {
        let Ok(reference) = self.classify(reference) else {
            return false;
        };

        match self.check_exists(&reference).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(reference = %reference, error = %e, "Error checking file existence");
                false
            }
        }
    }

    async fn check_exists(&self, reference: &StoredReference) -> Result<bool, StorageError> {
        let owned = self.active.owns(reference);
        if owned && self.active.exists(reference).await? {
            return Ok(true);
        }

        match reference {
            StoredReference::Local(_) if self.active.kind() != BackendKind::Local => {
                self.local.exists(reference).await
            }
            StoredReference::Cloud(url) | StoredReference::External(url) if !owned => {
                let resp = self.client.head(url).send().await?;
                Ok(resp.status().is_success())
            }
            _ => Ok(false),
        }
    }

    /// Best-effort removal. Returns `false` only for a missing or refused
    /// reference; once a backend is involved the answer is always `true` and
    /// failures are emitted as `storage::orphan` events.
    pub async fn delete(&self, reference: Option<&str>) -> bool {
        let Some(raw) = reference.filter(|r| !r.trim().is_empty()) else {
            return false;
        };
        let reference = match self.classify(raw) {
            Ok(reference) => reference,
            Err(e) => {
                tracing::warn!(reference = %raw, error = %e, "Delete rejected");
                return false;
            }
        };

        match &reference {
            StoredReference::External(url) => {
                tracing::warn!(url = %url, "Skipping deletion of external URL");
            }
            StoredReference::Cloud(_) if !self.active.owns(&reference) => {
                orphaned(
                    self.active.kind(),
                    &reference,
                    &StorageError::NotConfigured("cloud media"),
                );
            }
            _ => {
                if self.active.owns(&reference) {
                    if let Err(e) = self.active.delete(&reference).await {
                        orphaned(self.active.kind(), &reference, &e);
                    }
                }
                if reference.is_local() && self.active.kind() != BackendKind::Local {
                    if let Err(e) = self.local.delete(&reference).await {
                        orphaned(BackendKind::Local, &reference, &e);
                    }
                }
            }
        }
        true
    }

    /// URL a page should use to show the referenced image.
    pub async fn display_url(&self, reference: Option<&str>) -> String {
        let Some(raw) = reference.filter(|r| !r.trim().is_empty()) else {
            return PLACEHOLDER_IMAGE.to_string();
        };

        match self.classify(raw) {
            Ok(StoredReference::Cloud(url) | StoredReference::External(url)) => url,
            Ok(reference @ StoredReference::Local(_)) => {
                if self.check_exists(&reference).await.unwrap_or(false) {
                    format!("/storage/{}", reference.as_str())
                } else {
                    PLACEHOLDER_IMAGE.to_string()
                }
            }
            Err(_) => PLACEHOLDER_IMAGE.to_string(),
        }
    }
}

fn orphaned(backend: BackendKind, reference: &StoredReference, error: &StorageError) {
    tracing::warn!(
        target: "storage::orphan",
        backend = %backend,
        key = %reference,
        error = %error,
        "Storage object left behind after delete"
    );
}
