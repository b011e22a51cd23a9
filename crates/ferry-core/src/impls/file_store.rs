//! JsonFileStore - DurableStore backed by one JSON file per key.
//!
//! Writes go to a temp file in the same directory, are fsynced, then renamed
//! over the target, so a crash mid-write leaves the previous snapshot intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::ports::{DurableStore, StoreError};

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding the store files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`. Characters outside `[A-Za-z0-9._-]` map to `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{name}.json"))
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&value)?;
        let dir = self.root.clone();
        let target = self.path_for(key);

        // blocking fs work (fsync + rename) off the async runtime
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(|e| StoreError::Unavailable(format!("write task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.get("ferry.operations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        std::fs::write(store.path_for("k"), "  \n").unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let value = serde_json::json!([{"op_type": "createTask", "attempts": 0}]);

        store.set("ferry.operations", value.clone()).await.unwrap();
        assert_eq!(store.get("ferry.operations").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn overwrite_replaces_previous_value() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        store.set("k", serde_json::json!([1, 2, 3])).await.unwrap();
        store.set("k", serde_json::json!([])).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(serde_json::json!([])));

        // only the target file is left behind, no temp files
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        std::fs::write(store.path_for("k"), "{not json").unwrap();

        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let path = store.path_for("user/42:queue");
        assert_eq!(path.file_name().unwrap(), "user_42_queue.json");
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = JsonFileStore::open(&nested).unwrap();
        assert!(store.root().is_dir());
    }
}
