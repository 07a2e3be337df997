//! Shared test helpers.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::StorageError;
use crate::storage::FileStore;

/// Minimal in-memory file store for unit tests.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, String>>,
}

impl FileStore for MemoryStore {
    fn name(&self) -> &str {
        "test-memory"
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), StorageError> {
        self.files.lock().unwrap().insert(path.into(), contents.into());
        Ok(())
    }

    fn read(&self, path: &str) -> Result<String, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.into()))
    }

    fn list(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files
            .lock()
            .unwrap()
            .retain(|k, _| k != path && !k.starts_with(&prefix));
        Ok(())
    }
}
