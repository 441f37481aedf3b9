pub mod filesystem;

use async_trait::async_trait;

use crate::error::StorageError;

pub use filesystem::FileImageStore;

/// Storage for uploaded scan images.
///
/// Paths returned by [`ImageStore::save`] are opaque to callers; they are
/// stored on the item and handed back to `read` and `delete`.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes an image. A missing image is not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}
