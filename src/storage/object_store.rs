//! HTTP object store backend.
//!
//! Objects are addressed as `<endpoint>/<bucket>/<key>`; PUT uploads, GET
//! downloads, HEAD checks existence and DELETE removes. References handed back
//! to callers are the bare relative key.

use super::*;
use crate::config::ObjectStoreConfig;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::time::Duration;

pub struct ObjectStoreStorage {
    config: ObjectStoreConfig,
    client: Client,
}

impl ObjectStoreStorage {
    pub fn new(config: ObjectStoreConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { config, client })
    }

    fn object_url(&self, key: &str) -> String {
        let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
        format!(
            "{}/{}/{}",
            self.config.endpoint,
            urlencoding::encode(&self.config.bucket),
            encoded.join("/")
        )
    }

    fn request(&self, method: Method, key: &str) -> RequestBuilder {
        let req = self.client.request(method, self.object_url(key));
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn upload_from_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let resp = self
            .request(Method::PUT, key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    pub async fn download_as_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let resp = self.request(Method::GET, key).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp).await?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    pub async fn exists_key(&self, key: &str) -> Result<bool, StorageError> {
        let resp = self.request(Method::HEAD, key).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(StorageError::Backend {
                status: s.as_u16(),
                body: String::new(),
            }),
        }
    }

    pub async fn delete_key(&self, key: &str) -> Result<(), StorageError> {
        let resp = self.request(Method::DELETE, key).send().await?;
        if resp.status() != StatusCode::NOT_FOUND {
            ensure_success(resp).await?;
        }
        Ok(())
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Backend { status, body })
}

#[async_trait]
impl Storage for ObjectStoreStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn owns(&self, reference: &StoredReference) -> bool {
        reference.is_local()
    }

    async fn put(&self, key: &str, file: &FileData) -> Result<StoredReference, StorageError> {
        let content_type = file
            .content_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| content_type_for(key).to_string());

        self.upload_from_bytes(key, file.bytes.clone(), &content_type)
            .await?;

        tracing::info!(key = %key, size_bytes = file.bytes.len(), "File uploaded to object storage");
        Ok(StoredReference::Local(key.to_string()))
    }

    async fn get(&self, reference: &StoredReference) -> Result<Option<Vec<u8>>, StorageError> {
        match reference {
            StoredReference::Local(key) => self.download_as_bytes(key).await,
            _ => Ok(None),
        }
    }

    async fn exists(&self, reference: &StoredReference) -> Result<bool, StorageError> {
        match reference {
            StoredReference::Local(key) => self.exists_key(key).await,
            _ => Ok(false),
        }
    }

    async fn delete(&self, reference: &StoredReference) -> Result<(), StorageError> {
        if let StoredReference::Local(key) = reference {
            self.delete_key(key).await?;
            tracing::info!(key = %key, "File deleted from object storage");
        }
        Ok(())
    }
}
