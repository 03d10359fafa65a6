//! Object store for uploaded profile images.
//!
//! Objects are written under `<root>/<kind>/<uuid>.<ext>` and addressed by
//! `<public_base_url>/<kind>/<uuid>.<ext>`. Only image payloads are
//! accepted; serving the directory is left to whatever fronts the service.

use async_trait::async_trait;
use axum::body::Bytes;
use std::path::{Path, PathBuf};

/// Which profile image an upload is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Avatar,
    CoverImage,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::CoverImage => "cover-image",
        }
    }
}

/// Where a stored object landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{0} file is missing or empty")]
    Empty(&'static str),
    #[error("Only image uploads are accepted (got {0})")]
    UnsupportedType(String),
    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist `bytes` and return its key and public URL. `file_name` (as
    /// sent by the client) decides the extension and content type.
    async fn put(
        &self,
        kind: MediaKind,
        file_name: Option<&str>,
        bytes: Bytes,
    ) -> Result<StoredObject, MediaError>;
}

/// Local-directory object store.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_owned(),
            max_bytes,
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        kind: MediaKind,
        file_name: Option<&str>,
        bytes: Bytes,
    ) -> Result<StoredObject, MediaError> {
        if bytes.is_empty() {
            return Err(MediaError::Empty(kind.as_str()));
        }
        if bytes.len() > self.max_bytes {
            return Err(MediaError::TooLarge {
                limit: self.max_bytes,
            });
        }
        let extension = image_extension(file_name)?;

        let dir = self.root.join(kind.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let name = format!("{}.{extension}", uuid::Uuid::new_v4());
        tokio::fs::write(dir.join(&name), &bytes).await?;

        let key = format!("{}/{name}", kind.as_str());
        tracing::debug!(key = %key, size = bytes.len(), "Stored upload");
        Ok(StoredObject {
            url: format!("{}/{key}", self.public_base_url),
            key,
        })
    }
}

/// Lowercased extension of an image file name, or an error if the name does
/// not map to an `image/*` type.
fn image_extension(file_name: Option<&str>) -> Result<String, MediaError> {
    let name = file_name.unwrap_or_default();
    let mime = mime_guess::from_path(name).first();
    match (mime, Path::new(name).extension().and_then(|e| e.to_str())) {
        (Some(mime), Some(ext)) if mime.type_() == mime_guess::mime::IMAGE => {
            Ok(ext.to_ascii_lowercase())
        }
        (Some(mime), _) => Err(MediaError::UnsupportedType(mime.to_string())),
        (None, _) => Err(MediaError::UnsupportedType(if name.is_empty() {
            "unnamed file".into()
        } else {
            name.to_owned()
        })),
    }
}
