//! Single-slot on-disk storage with atomic promotion
//!
//! The cache holds exactly one file. Writers never touch the canonical path
//! directly: bytes go to a temporary file in the same directory, which is
//! then renamed over the canonical path. Readers therefore see either the
//! previous complete file or the new complete file, never a partial one.
//!
//! # Module Organization
//!
//! - [`file`] - [`FileStore`], the filesystem implementation
//!
//! # Examples
//!
//! ```rust,no_run
//! use cache_relay::app::store::{CacheStore, FileStore};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileStore::new();
//! let path = Path::new("./cache/image.jpg");
//!
//! store.ensure_parent_dir(path).await?;
//! store.save(path, b"image bytes".to_vec()).await?;
//! assert_eq!(store.load(path).await?, b"image bytes");
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreResult;

pub mod file;

pub use file::FileStore;

/// Storage backend for the cached resource
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Atomically replace the contents at `path`
    ///
    /// On failure the previous contents (if any) are left untouched and no
    /// temporary file is left behind.
    async fn save(&self, path: &Path, bytes: Vec<u8>) -> StoreResult<()>;

    /// Read the complete contents at `path`
    async fn load(&self, path: &Path) -> StoreResult<Vec<u8>>;

    /// Modification time of `path`
    ///
    /// Returns `Ok(None)` when the file does not exist. Returns
    /// [`StoreError::DirectoryNotAccessible`](crate::errors::StoreError::DirectoryNotAccessible)
    /// when the containing directory is missing or unusable.
    async fn modified_at(&self, path: &Path) -> StoreResult<Option<DateTime<Utc>>>;
}

/// Directory that holds `path`, treating a bare file name as the current directory
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
