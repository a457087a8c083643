use crate::errors::ConfigError;
use dotenvy::dotenv;
use std::{env, net::SocketAddr, path::PathBuf};

pub const DEFAULT_CLOUD_MARKER: &str = "cloudinary.com";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Which backend is authoritative for new uploads. Decided once at start-up.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    ObjectStore(ObjectStoreConfig),
    CloudMedia(CloudinaryConfig),
    Local,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub auth_token: String,
    pub host: String,
    pub port: u16,
    pub log_level: tracing::Level,
    /// Request body limit for the upload route.
    pub max_upload_bytes: usize,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub cloud_marker: String,
    pub backend: BackendConfig,
    /// Some but not all Cloudinary variables were set; they were ignored.
    pub cloudinary_incomplete: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port: u16 = match var("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw,
            })?,
            None => 8080,
        };

        let log_level: tracing::Level = match var("LOG_LEVEL") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "LOG_LEVEL",
                value: raw,
            })?,
            None => tracing::Level::INFO,
        };

        let max_upload_bytes: usize = match var("MAX_UPLOAD_BYTES") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "MAX_UPLOAD_BYTES",
                value: raw,
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            auth_token: var("AUTH_TOKEN").ok_or(ConfigError::Missing("AUTH_TOKEN"))?,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            log_level,
            max_upload_bytes,
            upload_dir: PathBuf::from(var("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string())),
            static_dir: PathBuf::from(var("STATIC_DIR").unwrap_or_else(|| "static".to_string())),
            cloud_marker: var("CLOUD_URL_MARKER")
                .unwrap_or_else(|| DEFAULT_CLOUD_MARKER.to_string()),
            backend: select_backend(&var),
            cloudinary_incomplete: cloudinary_incomplete(&var),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse()
            .map_err(|_| ConfigError::Invalid { key: "HOST", value: raw })
    }
}

// Priority: object store, then Cloudinary, then local disk.
fn select_backend(var: &impl Fn(&str) -> Option<String>) -> BackendConfig {
    if let (Some(endpoint), Some(bucket)) = (var("OBJECT_STORE_ENDPOINT"), var("OBJECT_STORE_BUCKET")) {
        return BackendConfig::ObjectStore(ObjectStoreConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            token: var("OBJECT_STORE_TOKEN"),
        });
    }

    match (
        var("CLOUDINARY_CLOUD_NAME"),
        var("CLOUDINARY_API_KEY"),
        var("CLOUDINARY_API_SECRET"),
    ) {
        (Some(cloud_name), Some(api_key), Some(api_secret)) => {
            BackendConfig::CloudMedia(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            })
        }
        _ => BackendConfig::Local,
    }
}

fn cloudinary_incomplete(var: &impl Fn(&str) -> Option<String>) -> bool {
    let set = ["CLOUDINARY_CLOUD_NAME", "CLOUDINARY_API_KEY", "CLOUDINARY_API_SECRET"]
        .into_iter()
        .filter(|key| var(*key).is_some())
        .count();
    set > 0 && set < 3
}
