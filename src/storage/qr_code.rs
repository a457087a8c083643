//! Artifact QR code images.
//!
//! Each artifact has one image under a fixed key, so regenerating it replaces
//! the previous one on every backend instead of accumulating copies.

use super::*;
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

const MODULE_PIXELS: u32 = 10;

pub fn qr_code_key(artifact_id: i64) -> String {
    format!("{}/qrcode_{artifact_id}.png", keys::QR_CODE_FOLDER)
}

/// Renders `content` as a black on white PNG with the standard quiet zone.
pub fn render_png(content: &str) -> Result<Vec<u8>, StorageError> {
    let code = QrCode::new(content.as_bytes()).map_err(|e| StorageError::Encode(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(MODULE_PIXELS, MODULE_PIXELS)
        .build();

    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| StorageError::Encode(e.to_string()))?;
    Ok(buffer)
}

impl FileStorage {
    /// Renders the artifact's QR code and stores it on the active backend,
    /// overwriting any earlier image for the same artifact.
    pub async fn store_qr_code(&self, content: &str, artifact_id: i64) -> Option<StoredReference> {
        if content.trim().is_empty() {
            tracing::debug!(artifact_id, "QR code skipped: empty content");
            return None;
        }

        let bytes = match render_png(content) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(artifact_id, error = %e, "QR code rendering failed");
                return None;
            }
        };

        let key = qr_code_key(artifact_id);
        let file = FileData {
            bytes,
            content_type: Some(mime::IMAGE_PNG),
            filename: key.rsplit('/').next().map(str::to_string),
        };

        match self.active().put(&key, &file).await {
            Ok(reference) => {
                tracing::info!(artifact_id, reference = %reference, "QR code stored");
                Some(reference)
            }
            Err(e) => {
                tracing::error!(
                    backend = %self.active_kind(),
                    key = %key,
                    error = %e,
                    "QR code upload failed"
                );
                None
            }
        }
    }
}
