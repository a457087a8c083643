//! Cloudinary media backend.
//!
//! Uploads go through the signed REST upload API with `resource_type=auto`
//! and come back as `secure_url` references. Deletion works backwards from
//! that URL, since the public id is the only handle Cloudinary accepts.

use super::*;
use crate::config::CloudinaryConfig;
use reqwest::{Client, StatusCode, multipart};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

pub struct CloudinaryStorage {
    config: CloudinaryConfig,
    client: Client,
    api_base: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Deserialize)]
struct DestroyResponse {
    result: String,
}

impl CloudinaryStorage {
    pub fn new(config: CloudinaryConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            config,
            client,
            api_base: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    fn endpoint(&self, resource_type: &str, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.api_base, self.config.cloud_name, resource_type, action
        )
    }

    /// Signs `params` (unsorted, unencoded) the way the upload API expects:
    /// sorted `k=v` pairs joined by `&`, secret appended, SHA-256 hex digest.
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let mut sorted = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        hex::encode(Sha256::digest(format!("{joined}{}", self.config.api_secret)))
    }

    pub async fn upload(
        &self,
        file: &FileData,
        public_id: &str,
        resource_type: &str,
    ) -> Result<String, StorageError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&[
            ("overwrite", "true"),
            ("public_id", public_id),
            ("timestamp", &timestamp),
        ]);

        let mut part = multipart::Part::bytes(file.bytes.clone());
        if let Some(name) = &file.filename {
            part = part.file_name(name.clone());
        }

        let form = multipart::Form::new()
            .part("file", part)
            .text("public_id", public_id.to_string())
            .text("overwrite", "true")
            .text("timestamp", timestamp)
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature);

        let resp = self
            .client
            .post(self.endpoint(resource_type, "upload"))
            .multipart(form)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        Ok(body.secure_url)
    }

    pub async fn destroy(&self, public_id: &str, resource_type: &str) -> Result<String, StorageError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", public_id), ("timestamp", &timestamp)]);

        let resp = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&[
                ("public_id", public_id),
                ("timestamp", timestamp.as_str()),
                ("api_key", self.config.api_key.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: DestroyResponse = resp
            .json()
            .await
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        Ok(body.result)
    }

    async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp).await?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Backend { status, body })
}

/// Recovers `(resource_type, public_id)` from a delivery URL such as
/// `https://res.cloudinary.com/<cloud>/image/upload/v1712/gallery/abc_photo.jpg`.
///
/// The version segment is dropped, and so is the extension except for `raw`
/// resources, whose public id keeps it.
pub fn parse_delivery_url(url: &str) -> Option<(String, String)> {
    let (before, after) = url.split_once("/upload/")?;
    let resource_type = match before.rsplit('/').next() {
        Some(kind @ ("image" | "video" | "raw")) => kind,
        _ => "image",
    };

    let path = after.split(['?', '#']).next().unwrap_or(after);
    let path = match path.split_once('/') {
        Some((version, rest))
            if version.len() > 1
                && version.starts_with('v')
                && version[1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            rest
        }
        _ => path,
    };

    let public_id = if resource_type == "raw" {
        path
    } else {
        match path.rsplit_once('.') {
            Some((stem, ext)) if !ext.contains('/') => stem,
            _ => path,
        }
    };

    (!public_id.is_empty()).then(|| (resource_type.to_string(), public_id.to_string()))
}

#[async_trait]
impl Storage for CloudinaryStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudMedia
    }

    fn owns(&self, reference: &StoredReference) -> bool {
        matches!(reference, StoredReference::Cloud(_))
    }

    async fn put(&self, key: &str, file: &FileData) -> Result<StoredReference, StorageError> {
        let (public_id, _) = keys::split_extension(key);
        let url = self.upload(file, public_id, "auto").await?;

        tracing::info!(public_id = %public_id, url = %url, "File uploaded to Cloudinary");
        Ok(StoredReference::Cloud(url))
    }

    async fn get(&self, reference: &StoredReference) -> Result<Option<Vec<u8>>, StorageError> {
        match reference {
            StoredReference::Cloud(url) => self.fetch(url).await,
            _ => Ok(None),
        }
    }

    async fn exists(&self, reference: &StoredReference) -> Result<bool, StorageError> {
        let StoredReference::Cloud(url) = reference else {
            return Ok(false);
        };
        let resp = self.client.head(url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn delete(&self, reference: &StoredReference) -> Result<(), StorageError> {
        let StoredReference::Cloud(url) = reference else {
            return Ok(());
        };
        let (resource_type, public_id) = parse_delivery_url(url)
            .ok_or_else(|| StorageError::Decode(format!("no public id in {url}")))?;

        let result = self.destroy(&public_id, &resource_type).await?;
        tracing::info!(public_id = %public_id, result = %result, "File deleted from Cloudinary");
        Ok(())
    }
}
