mod local;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::market::domain::{ItemId, MarketError, ProfileId};

pub use self::local::LocalObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Invalid public URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<StorageError> for MarketError {
    fn from(err: StorageError) -> Self {
        MarketError::DependencyFailure(err.to_string())
    }
}

/// Relative, slash-separated key of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self, StorageError> {
        let path = path.into();
        let valid = !path.is_empty()
            && !path.starts_with('/')
            && !path.contains('\\')
            && path
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");
        if valid {
            Ok(Self(path))
        } else {
            Err(StorageError::InvalidPath(path))
        }
    }

    /// `<owner>/<item>/<millis>-<index>.<ext>`
    pub fn item_image(
        owner: &ProfileId,
        item: &ItemId,
        uploaded_at: DateTime<Utc>,
        index: usize,
        extension: &str,
    ) -> Result<Self, StorageError> {
        Self::new(format!(
            "{}/{}/{}-{}.{}",
            owner,
            item,
            uploaded_at.timestamp_millis(),
            index,
            extension
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blob storage that hands back a public URL per stored object
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the blob and return its public URL
    async fn put(&self, path: &ObjectPath, data: Bytes) -> Result<String, StorageError>;

    /// Remove a blob; removing a missing blob is not an error
    async fn delete(&self, path: &ObjectPath) -> Result<(), StorageError>;
}

/// Raster formats accepted for item photos. Scriptable formats such as SVG
/// are served back from `/uploads` and must never be stored.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// File extension to store an upload under, or `None` if it is not an
/// accepted raster image. The file name wins over the declared content type.
pub fn image_extension(file_name: &str, content_type: Option<&str>) -> Option<String> {
    let from_name = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    if let Some(ext) = from_name {
        return IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext);
    }

    let mime: mime_guess::Mime = content_type?.parse().ok()?;
    if mime.type_() != mime_guess::mime::IMAGE {
        return None;
    }
    let extensions = mime_guess::get_mime_extensions(&mime)?;
    let accepted = |ext: &&&str| IMAGE_EXTENSIONS.contains(*ext);
    extensions
        .iter()
        .filter(accepted)
        .find(|ext| **ext == mime.subtype().as_str())
        .or_else(|| extensions.iter().find(accepted))
        .map(|ext| ext.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_rejects_escapes() {
        assert!(ObjectPath::new("a/b/c.jpg").is_ok());
        assert!(ObjectPath::new("").is_err());
        assert!(ObjectPath::new("/etc/passwd").is_err());
        assert!(ObjectPath::new("a/../b.jpg").is_err());
        assert!(ObjectPath::new("a//b.jpg").is_err());
        assert!(ObjectPath::new("a\\b.jpg").is_err());
    }

    #[test]
    fn item_image_path_layout() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = ObjectPath::item_image(
            &ProfileId::new("user-1"),
            &ItemId::new("item-9"),
            at,
            2,
            "png",
        )
        .unwrap();
        assert_eq!(path.as_str(), "user-1/item-9/1714564800000-2.png");
    }

    #[test]
    fn image_extension_prefers_file_name() {
        assert_eq!(image_extension("Photo.JPG", None).as_deref(), Some("jpg"));
        assert_eq!(
            image_extension("shirt.png", Some("application/octet-stream")).as_deref(),
            Some("png")
        );
        assert_eq!(image_extension("notes.txt", Some("image/png")), None);
    }

    #[test]
    fn image_extension_falls_back_to_content_type() {
        assert_eq!(image_extension("blob", Some("image/png")).as_deref(), Some("png"));
        assert_eq!(image_extension("blob", Some("text/plain")), None);
        assert_eq!(image_extension("blob", None), None);
    }

    #[test]
    fn image_extension_refuses_scriptable_formats() {
        assert_eq!(image_extension("logo.svg", Some("image/png")), None);
        assert_eq!(image_extension("logo.SVGZ", None), None);
        assert_eq!(image_extension("blob", Some("image/svg+xml")), None);
        assert_eq!(image_extension("scan.tiff", Some("image/tiff")), None);
        assert_eq!(image_extension("blob", Some("image/webp")).as_deref(), Some("webp"));
    }
}
