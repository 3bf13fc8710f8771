mod migrate;

pub use migrate::{upgrade_storage, CURRENT_LAYOUT_VERSION, VERSION_FILE};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};

use tagfs_lib::{ItemId, TagFsError, TagFsResult};

/// `<id:9>_<name>` grammar of every blob filename.
pub static BLOB_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)_(.*)$").unwrap());

/// Deterministic blob path under `root`, creating the bucket directories
/// on demand.
pub(crate) fn derived_path(root: &Path, id: ItemId, name: &str) -> TagFsResult<PathBuf> {
    let dir = root
        .join(format!("{:06}", id / 1000))
        .join(format!("{:03}", id % 1000));
    std::fs::create_dir_all(&dir)
        .map_err(|e| TagFsError::IoError(format!("create blob dir failed: {}", e)))?;
    Ok(dir.join(format!("{:09}_{}", id, name)))
}

/// On-disk blob storage. A blob is addressed by `(id, name)`; its path is
/// `<root>/<id/1000:06>/<id%1000:03>/<id:09>_<name>` with the containing
/// directories created on demand.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens the store root, creating it if absent and upgrading older
    /// on-disk layout generations in place.
    pub fn new(root: impl Into<PathBuf>) -> TagFsResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| TagFsError::IoError(format!("create store root failed: {}", e)))?;
        migrate::upgrade_storage(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, id: ItemId, name: &str) -> TagFsResult<PathBuf> {
        derived_path(&self.root, id, name)
    }

    pub async fn create(&self, id: ItemId, name: &str) -> TagFsResult<File> {
        let path = self.blob_path(id, name)?;
        debug!("creating blob {}", path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(file)
    }

    pub async fn open(&self, id: ItemId, name: &str, options: OpenOptions) -> TagFsResult<File> {
        let path = self.blob_path(id, name)?;
        let file = options.open(&path).await?;
        Ok(file)
    }

    pub async fn metadata(&self, id: ItemId, name: &str) -> TagFsResult<std::fs::Metadata> {
        let path = self.blob_path(id, name)?;
        Ok(fs::metadata(&path).await?)
    }

    pub async fn truncate(&self, id: ItemId, name: &str, size: u64) -> TagFsResult<()> {
        let path = self.blob_path(id, name)?;
        let file = OpenOptions::new().write(true).open(&path).await?;
        file.set_len(size).await?;
        Ok(())
    }

    pub async fn remove(&self, id: ItemId, name: &str) -> TagFsResult<()> {
        let path = self.blob_path(id, name)?;
        debug!("removing blob {}", path.display());
        fs::remove_file(&path).await?;
        Ok(())
    }

    /// Moves a blob to the deterministic path of its new `(id, name)`.
    pub async fn rename(
        &self,
        old_id: ItemId,
        old_name: &str,
        new_id: ItemId,
        new_name: &str,
    ) -> TagFsResult<()> {
        let from = self.blob_path(old_id, old_name)?;
        let to = self.blob_path(new_id, new_name)?;
        debug!("renaming blob {} -> {}", from.display(), to.display());
        fs::rename(&from, &to).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

    fn test_store() -> (BlobStore, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("storage")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_blob_path_layout() {
        let (store, _dir) = test_store();
        let path = store.blob_path(1234, "doc").unwrap();
        let rel = path.strip_prefix(store.root()).unwrap();
        assert_eq!(rel, Path::new("000001/234/000001234_doc"));
        assert!(path.parent().unwrap().is_dir());

        let path = store.blob_path(7, "x").unwrap();
        let rel = path.strip_prefix(store.root()).unwrap();
        assert_eq!(rel, Path::new("000000/007/000000007_x"));
    }

    #[test]
    fn test_filename_grammar() {
        let caps = BLOB_FILENAME.captures("000001234_doc").unwrap();
        assert_eq!(&caps[1], "000001234");
        assert_eq!(&caps[2], "doc");
        assert!(BLOB_FILENAME.captures("version.txt").is_none());
    }

    #[tokio::test]
    async fn test_create_write_read() {
        let (store, _dir) = test_store();
        let mut file = store.create(5, "hello").await.unwrap();
        file.write_all(b"payload").await.unwrap();
        file.flush().await.unwrap();

        let mut file = store
            .open(5, "hello", {
                let mut o = OpenOptions::new();
                o.read(true);
                o
            })
            .await
            .unwrap();
        let mut buf = String::new();
        file.seek(std::io::SeekFrom::Start(0)).await.unwrap();
        file.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "payload");

        let meta = store.metadata(5, "hello").await.unwrap();
        assert_eq!(meta.len(), 7);
    }

    #[tokio::test]
    async fn test_truncate_and_remove() {
        let (store, _dir) = test_store();
        let mut file = store.create(9, "t").await.unwrap();
        file.write_all(b"0123456789").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        store.truncate(9, "t", 4).await.unwrap();
        assert_eq!(store.metadata(9, "t").await.unwrap().len(), 4);

        store.remove(9, "t").await.unwrap();
        let err = store.metadata(9, "t").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rename_moves_to_new_path() {
        let (store, _dir) = test_store();
        let mut file = store.create(1500, "old").await.unwrap();
        file.write_all(b"data").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        store.rename(1500, "old", 1500, "new").await.unwrap();
        assert!(store.metadata(1500, "old").await.unwrap_err().is_not_found());
        assert_eq!(store.metadata(1500, "new").await.unwrap().len(), 4);
    }
}
