use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::ImageStore;
use crate::error::StorageError;

/// Extensions accepted for scan images.
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// Image store rooted at a directory. Stored paths are file names relative
/// to the root.
pub struct FileImageStore {
    root: PathBuf,
}

impl FileImageStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolves a stored path, refusing anything that would leave the root.
    fn resolve(&self, stored: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(stored);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if stored.is_empty() || escapes {
            return Err(StorageError::OutsideStore(relative.to_path_buf()));
        }
        Ok(self.root.join(relative))
    }
}

fn normalize_extension(extension: &str) -> Result<String, StorageError> {
    let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(StorageError::UnsupportedExtension(extension.to_string()))
    }
}

#[async_trait]
impl ImageStore for FileImageStore {
    async fn save(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::EmptyImage);
        }
        let ext = normalize_extension(extension)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: self.root.clone(),
                source: e,
            })?;

        let filename = format!("{}.{}", uuid::Uuid::new_v4(), ext);
        let path = self.root.join(&filename);

        // create_new fails if the name is taken instead of overwriting it.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.flush().await.map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        log::debug!("Stored scan image {} ({} bytes)", filename, bytes.len());
        Ok(filename)
    }

    async fn read(&self, stored: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(stored)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::ReadFile { path, source: e })
    }

    async fn delete(&self, stored: &str) -> Result<(), StorageError> {
        let path = self.resolve(stored)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFile { path, source: e }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileImageStore::new(dir.path().join("images"));

        let stored = store.save(b"\x89PNG fake", ".PNG").await.unwrap();
        assert!(stored.ends_with(".png"));
        assert_eq!(store.read(&stored).await.unwrap(), b"\x89PNG fake");

        store.delete(&stored).await.unwrap();
        assert!(!dir.path().join("images").join(&stored).exists());
        // Deleting twice is fine.
        store.delete(&stored).await.unwrap();
    }

    #[tokio::test]
    async fn test_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let store = FileImageStore::new(dir.path());
        let a = store.save(b"a", "jpg").await.unwrap();
        let b = store.save(b"a", "jpg").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_unknown_types() {
        let dir = TempDir::new().unwrap();
        let store = FileImageStore::new(dir.path());
        assert!(matches!(
            store.save(b"", "jpg").await,
            Err(StorageError::EmptyImage)
        ));
        assert!(matches!(
            store.save(b"x", "exe").await,
            Err(StorageError::UnsupportedExtension(_))
        ));
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_root() {
        let dir = TempDir::new().unwrap();
        let store = FileImageStore::new(dir.path().join("images"));
        assert!(matches!(
            store.read("../secret.png").await,
            Err(StorageError::OutsideStore(_))
        ));
        assert!(matches!(
            store.delete("/etc/passwd").await,
            Err(StorageError::OutsideStore(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let store = FileImageStore::new(dir.path());
        let err = store.read("missing.png").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidInput);
    }
}
