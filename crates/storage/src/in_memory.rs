//! In-memory file store: nothing survives the process.

use devloop_core::FileStore;
use devloop_core::error::StorageError;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Keeps every object in a sorted map. Contents vanish with the process.
pub struct InMemoryFileStore {
    files: RwLock<BTreeMap<String, String>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

fn dir_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

fn poisoned(path: &str) -> StorageError {
    StorageError::Io {
        path: path.to_string(),
        reason: "store lock poisoned".into(),
    }
}

impl FileStore for InMemoryFileStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), StorageError> {
        let mut files = self.files.write().map_err(|_| poisoned(path))?;
        files.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    fn read(&self, path: &str) -> Result<String, StorageError> {
        let files = self.files.read().map_err(|_| poisoned(path))?;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn list(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let files = self.files.read().map_err(|_| poisoned(path))?;
        let prefix = dir_prefix(path);
        let entries: Vec<String> = files
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, _)| k.clone())
            .collect();
        if entries.is_empty() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(entries)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut files = self.files.write().map_err(|_| poisoned(path))?;
        let prefix = dir_prefix(path);
        let before = files.len();
        files.retain(|k, _| k != path && !k.starts_with(&prefix));
        if files.len() == before {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(())
    }
}
