//! Filesystem-backed storage for post images.
//!
//! Stored paths are relative to the media root and always land under
//! `posts/`; the resolver rejects absolute paths and parent-directory
//! components so a crafted request path can never escape the root.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MediaStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error("stored file not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    /// Initialise storage rooted at the provided directory, creating it
    /// if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Persist an image payload and return its stored path, e.g.
    /// `posts/1f2e3d4c-vacation-photo.png`.
    pub async fn store(
        &self,
        original_name: &str,
        data: &[u8],
    ) -> Result<String, MediaStorageError> {
        let stored_path = build_stored_path(original_name);
        let absolute = self.resolve(&stored_path)?;

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(stored_path)
    }

    /// Read a stored payload into memory. A missing file maps to
    /// [`MediaStorageError::NotFound`] so the HTTP layer can answer 404.
    pub async fn read(&self, stored_path: &str) -> Result<Bytes, MediaStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::read(absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaStorageError::NotFound)
            }
            Err(err) => Err(MediaStorageError::Io(err)),
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, MediaStorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(MediaStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn build_stored_path(original_name: &str) -> String {
    let identifier = Uuid::new_v4().simple().to_string();
    let short = &identifier[..8];
    format!("posts/{short}-{}", sanitize_filename(original_name))
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("image");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "image".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_read_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = MediaStorage::new(dir.path().to_path_buf()).expect("storage");

        let stored = storage
            .store("Vacation Photo.PNG", b"fake image bytes")
            .await
            .expect("stored");
        assert!(stored.starts_with("posts/"));
        assert!(stored.ends_with("-vacation-photo.png"));

        let data = storage.read(&stored).await.expect("read back");
        assert_eq!(&data[..], b"fake image bytes");
    }

    #[tokio::test]
    async fn traversal_components_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = MediaStorage::new(dir.path().to_path_buf()).expect("storage");

        let err = storage.read("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, MediaStorageError::InvalidPath));

        let err = storage.read("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, MediaStorageError::InvalidPath));
    }

    #[tokio::test]
    async fn missing_file_maps_to_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = MediaStorage::new(dir.path().to_path_buf()).expect("storage");

        let err = storage.read("posts/nope.png").await.unwrap_err();
        assert!(matches!(err, MediaStorageError::NotFound));
    }

    #[test]
    fn hostile_filenames_are_slugged() {
        let stored = build_stored_path("../../evil name!!.JPG");
        assert!(stored.starts_with("posts/"));
        assert!(stored.ends_with(".jpg"));
        assert!(!stored.contains(".."));
    }
}
