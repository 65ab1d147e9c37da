use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Key for a raw or merged segment object.
pub fn object_key(channel_id: &str, file_name: &str) -> String {
    format!("recordings/{channel_id}/{file_name}")
}

/// Thumbnail sits next to its segment, extension swapped to jpg.
pub fn thumbnail_key(key: &str) -> String {
    match key.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.jpg"),
        None => format!("{key}.jpg"),
    }
}

#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, key: &str, source: &Path) -> StorageResult<()>;
    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()>;
    async fn delete(&self, key: &str) -> StorageResult<()>;
    async fn exists(&self, key: &str) -> StorageResult<bool>;
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;
}

/// Filesystem-backed store. Keys map to paths under a single root;
/// production deployments swap in a bucket-backed implementation.
#[derive(Debug, Clone)]
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|part| !part.is_empty() && *part != "..") {
            path.push(part);
        }
        path
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn upload(&self, key: &str, source: &Path) -> StorageResult<()> {
        let dest = self.key_path(key);
        self.ensure_parent(&dest).await?;
        fs::copy(source, &dest)
            .await
            .map(|_| ())
            .map_err(|source| StorageError::Io {
                source,
                path: dest,
            })
    }

    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let source = self.key_path(key);
        if !fs::try_exists(&source)
            .await
            .map_err(|err| StorageError::Io {
                source: err,
                path: source.clone(),
            })?
        {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        fs::copy(&source, dest)
            .await
            .map(|_| ())
            .map_err(|source| StorageError::Io {
                source,
                path: dest.to_path_buf(),
            })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(source) => Err(StorageError::Io { source, path }),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key);
        fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::Io { source, path })
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.key_path(from);
        let dest = self.key_path(to);
        self.ensure_parent(&dest).await?;
        match fs::rename(&source, &dest).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(from.to_string()))
            }
            Err(source) => Err(StorageError::Io { source, path: dest }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_recording_scheme() {
        assert_eq!(
            object_key("channel-a", "seg_0001.mp4"),
            "recordings/channel-a/seg_0001.mp4"
        );
        assert_eq!(
            thumbnail_key("recordings/channel-a/seg_0001.mp4"),
            "recordings/channel-a/seg_0001.jpg"
        );
        assert_eq!(thumbnail_key("noext"), "noext.jpg");
    }

    #[tokio::test]
    async fn fs_storage_round_trip_and_delete() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = FsObjectStorage::new(dir.path().join("objects"));
        let local = dir.path().join("upload.bin");
        tokio::fs::write(&local, b"segment bytes").await.unwrap();

        let key = object_key("channel-a", "seg.bin");
        storage.upload(&key, &local).await.unwrap();
        assert!(storage.exists(&key).await.unwrap());

        let fetched = dir.path().join("fetched.bin");
        storage.download(&key, &fetched).await.unwrap();
        assert_eq!(tokio::fs::read(&fetched).await.unwrap(), b"segment bytes");

        storage.delete(&key).await.unwrap();
        assert!(!storage.exists(&key).await.unwrap());
        assert!(matches!(
            storage.delete(&key).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
