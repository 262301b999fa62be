use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{validate_key, DocumentStore, StorageError, StorageResult, StoredFile};

/// Filesystem-backed document store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io { key: key.to_string(), source }
}

#[async_trait]
impl DocumentStore for LocalStore {
    /// Writes to a temp file next to the target, then renames.
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(key))?;
        }
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        let write = async {
            let mut f = tokio::fs::File::create(&tmp).await?;
            f.write_all(bytes).await?;
            f.sync_all().await?;
            drop(f);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = write {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(key)(e));
        }
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<StoredFile> {
        let path = self.path(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StorageError::NotFound(key.to_string())),
            Err(e) => return Err(io_err(key)(e)),
        };
        let size = file.metadata().await.map_err(io_err(key))?.len();
        Ok(StoredFile { size, reader: Box::pin(file) })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path(key)?;
        tokio::fs::try_exists(&path).await.map_err(io_err(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(store: &LocalStore, key: &str) -> Vec<u8> {
        let mut file = store.open(key).await.unwrap();
        let mut buf = Vec::new();
        file.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(file.size, buf.len() as u64);
        buf
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("academic/3/a.pdf", b"%PDF-1.4").await.unwrap();
        assert!(store.exists("academic/3/a.pdf").await.unwrap());
        assert_eq!(read_all(&store, "academic/3/a.pdf").await, b"%PDF-1.4");

        // overwrite
        store.put("academic/3/a.pdf", b"v2").await.unwrap();
        assert_eq!(read_all(&store, "academic/3/a.pdf").await, b"v2");

        store.delete("academic/3/a.pdf").await.unwrap();
        assert!(!store.exists("academic/3/a.pdf").await.unwrap());
        // second delete is a no-op
        store.delete("academic/3/a.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_and_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(store.open("nope.pdf").await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.put("../escape.pdf", b"x").await, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_no_temp_files_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("k/file.pdf", b"data").await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path().join("k"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["file.pdf".to_string()]);
    }
}
