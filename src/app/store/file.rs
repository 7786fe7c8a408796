//! Filesystem store with temp-file + rename writes

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, error, info};

use crate::constants::files;
use crate::errors::{StoreError, StoreResult};

use super::{parent_dir, CacheStore};

/// Cache store backed by the local filesystem
#[derive(Debug, Default, Clone)]
pub struct FileStore;

impl FileStore {
    pub fn new() -> Self {
        Self
    }

    /// Create the directory that will hold `path` if it does not exist yet
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DirectoryNotAccessible` if the directory cannot be created
    pub async fn ensure_parent_dir(&self, path: &Path) -> StoreResult<()> {
        let dir = parent_dir(path);
        match fs::metadata(dir).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::DirectoryNotAccessible {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
            }),
            Err(_) => {
                fs::create_dir_all(dir).await.map_err(|source| {
                    error!("Failed to create cache directory {}: {}", dir.display(), source);
                    StoreError::DirectoryNotAccessible {
                        path: dir.to_path_buf(),
                        source,
                    }
                })?;
                debug!("Created cache directory: {}", dir.display());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn save(&self, path: &Path, bytes: Vec<u8>) -> StoreResult<()> {
        let final_path = path.to_path_buf();
        let size = bytes.len();

        tokio::task::spawn_blocking(move || write_atomic(&final_path, &bytes)).await??;

        info!(bytes = size, "Saved cache file: {}", path.display());
        Ok(())
    }

    async fn load(&self, path: &Path) -> StoreResult<Vec<u8>> {
        fs::read(path).await.map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    async fn modified_at(&self, path: &Path) -> StoreResult<Option<DateTime<Utc>>> {
        let dir = parent_dir(path);
        let dir_metadata =
            fs::metadata(dir)
                .await
                .map_err(|source| StoreError::DirectoryNotAccessible {
                    path: dir.to_path_buf(),
                    source,
                })?;
        if !dir_metadata.is_dir() {
            return Err(StoreError::DirectoryNotAccessible {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
            });
        }

        match fs::metadata(path).await {
            Ok(metadata) => {
                let modified = metadata.modified().map_err(|source| StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Write `bytes` next to `final_path` and rename over it
///
/// The temporary file is deleted when it goes out of scope, so every early
/// return (including a failed rename) cleans up after itself.
fn write_atomic(final_path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let file_name = final_path
        .file_name()
        .ok_or_else(|| StoreError::InvalidPath {
            path: final_path.to_path_buf(),
        })?
        .to_string_lossy()
        .into_owned();
    let dir = parent_dir(final_path);

    let mut temp = tempfile::Builder::new()
        .prefix(&format!("{}.", file_name))
        .suffix(files::TEMP_FILE_SUFFIX)
        .tempfile_in(dir)
        .map_err(|source| StoreError::TempFile {
            dir: dir.to_path_buf(),
            source,
        })?;

    if let Err(source) = write_contents(&mut temp, bytes) {
        error!("Failed to write temporary file: {}", source);
        return Err(StoreError::Write {
            path: temp.path().to_path_buf(),
            source,
        });
    }

    let temp_path = temp.path().to_path_buf();
    temp.persist(final_path).map_err(|e| {
        error!("Failed to rename temporary file: {}", e.error);
        StoreError::AtomicRename {
            temp_path,
            final_path: final_path.to_path_buf(),
            source: e.error,
        }
    })?;

    Ok(())
}

fn write_contents(temp: &mut NamedTempFile, bytes: &[u8]) -> std::io::Result<()> {
    temp.write_all(bytes)?;
    temp.flush()?;

    // Temp files are created owner-only; the cache file is meant to be shared
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(files::CACHE_FILE_PERMISSIONS))?;
    }

    temp.as_file().sync_all()
}
