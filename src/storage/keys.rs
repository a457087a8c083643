//! Storage key generation.
//!
//! Every upload lands under `<folder>/<token>_<filename>`, where the token is a
//! UUID v4 in simple (hex) form and the filename has been sanitised. Folder
//! names are normalised so legacy callers passing `uploads/gallery` and new
//! callers passing `gallery` share one layout.

use uuid::Uuid;

pub const DEFAULT_FOLDER: &str = "general";
pub const QR_CODE_FOLDER: &str = "qrcodes";

/// Folders created on local disk at start-up so the fallback is always ready.
pub const KNOWN_FOLDERS: &[&str] = &[
    "artifacts",
    "artefatos",
    "gallery",
    "profiles",
    "cvs",
    QR_CODE_FOLDER,
    "3d_models",
    "3d_scans",
    "photos",
    "iphan_forms",
    "equipe",
];

/// Reduces a user supplied filename to `[A-Za-z0-9._-]`, with whitespace
/// collapsed to `_`. Returns `None` if nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let spaced: String = raw
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .filter(|c| c.is_ascii())
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn normalize_folder(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    let trimmed = if trimmed == "uploads" {
        ""
    } else {
        trimmed.strip_prefix("uploads/").unwrap_or(trimmed)
    };

    let segments: Vec<String> = trimmed
        .split(['/', '\\'])
        .filter_map(sanitize_filename)
        .collect();

    if segments.is_empty() {
        DEFAULT_FOLDER.to_string()
    } else {
        segments.join("/")
    }
}

pub fn unique_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn unique_key(folder: &str, filename: &str) -> String {
    format!("{}/{}_{}", folder, unique_token(), filename)
}

/// Splits `photo.jpg` into (`photo`, `Some("jpg")`).
pub fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => (stem, Some(ext)),
        _ => (filename, None),
    }
}
