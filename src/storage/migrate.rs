//! One-off copy of files from local disk into the active object store.

use super::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl FileStorage {
    /// Copies every file under the uploads directory (and the legacy
    /// `<static>/uploads` tree) into the active backend, keyed by its path
    /// relative to that root. Objects that already exist are skipped.
    pub async fn migrate_local_files(&self) -> Result<MigrationReport, StorageError> {
        if matches!(
            self.active_kind(),
            BackendKind::Local | BackendKind::CloudMedia
        ) {
            return Err(StorageError::NotConfigured("object store"));
        }

        let local = self.local();
        let roots = vec![
            (local.upload_dir().to_path_buf(), local.upload_dir().to_path_buf()),
            (local.static_dir().join("uploads"), local.static_dir().to_path_buf()),
        ];
        let files = tokio::task::spawn_blocking(move || collect_files(&roots))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        let mut report = MigrationReport::default();
        for (key, path) in files {
            match self.migrate_one(&key, &path).await {
                Ok(true) => {
                    report.migrated += 1;
                    tracing::info!(key = %key, "Migrated");
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(key = %key, error = %e, "Failed to migrate");
                }
            }
        }

        tracing::info!(
            migrated = report.migrated,
            skipped = report.skipped,
            errors = report.errors,
            "Migration complete"
        );
        Ok(report)
    }

    async fn migrate_one(&self, key: &str, path: &Path) -> Result<bool, StorageError> {
        let reference = StoredReference::Local(key.to_string());
        if self.active().exists(&reference).await? {
            return Ok(false);
        }

        let file = FileData {
            bytes: tokio::fs::read(path).await?,
            content_type: None,
            filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        };
        self.active().put(key, &file).await?;
        Ok(true)
    }
}

fn collect_files(roots: &[(PathBuf, PathBuf)]) -> Vec<(String, PathBuf)> {
    let mut files = Vec::new();
    for (root, base) in roots {
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(base) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((key, entry.path().to_path_buf()));
        }
    }
    files.sort();
    files
}
