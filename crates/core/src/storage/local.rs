//! Filesystem-backed object store.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use super::{ObjectStore, StorageError, StoredObject};

const BUFFER_SIZE: usize = 64 * 1024;

/// Stores objects as files under a root directory.
///
/// Writes go to a temporary sibling first and are renamed into place once
/// the copy has been verified, so readers never see a partial object.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root,
            public_base_url: None,
        }
    }

    /// Builds result URLs as `<base>/<key>` instead of `file://` paths.
    pub fn with_public_base_url(mut self, base: Option<String>) -> Self {
        self.public_base_url = base.map(|b| b.trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a key to a path under the root, rejecting traversal.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = || StorageError::InvalidKey {
            key: key.to_string(),
        };
        if key.is_empty() || key.contains('\\') {
            return Err(invalid());
        }
        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(invalid());
        }
        Ok(self.root.join(relative))
    }

    /// Copies `source` to `destination`, returning size and SHA-256.
    async fn copy_hashed(
        key: &str,
        source: &Path,
        destination: &Path,
    ) -> Result<(u64, String), StorageError> {
        let source_file = File::open(source)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        let dest_file = File::create(destination)
            .await
            .map_err(|e| StorageError::io(key, e))?;

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);
        let mut hasher = Sha256::new();
        let mut total_bytes = 0u64;
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| StorageError::io(key, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            writer
                .write_all(&buffer[..bytes_read])
                .await
                .map_err(|e| StorageError::io(key, e))?;
            total_bytes += bytes_read as u64;
        }

        writer.flush().await.map_err(|e| StorageError::io(key, e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| StorageError::io(key, e))?;

        Ok((total_bytes, format!("{:x}", hasher.finalize())))
    }

    async fn checksum(key: &str, path: &Path) -> Result<String, StorageError> {
        let file = File::open(path).await.map_err(|e| StorageError::io(key, e))?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| StorageError::io(key, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, key: &str, source: &Path) -> Result<StoredObject, StorageError> {
        let destination = self.path_for(key)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }

        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let partial = destination.with_file_name(format!(
            ".{}.{}.partial",
            file_name,
            uuid::Uuid::new_v4()
        ));

        let written = async {
            let (size_bytes, expected) = Self::copy_hashed(key, source, &partial).await?;
            let actual = Self::checksum(key, &partial).await?;
            if actual != expected {
                return Err(StorageError::ChecksumMismatch {
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }
            fs::rename(&partial, &destination)
                .await
                .map_err(|e| StorageError::io(key, e))?;
            Ok((size_bytes, actual))
        }
        .await;

        let (size_bytes, checksum) = match written {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        debug!(key = %key, size_bytes, "Stored object");
        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            checksum,
            url: self.url(key),
        })
    }

    async fn get(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let path = self.path_for(key)?;
        fs::copy(&path, dest)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| StorageError::io(key, e))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    fn url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("file://{}", self.root.join(key).display()),
        }
    }
}
