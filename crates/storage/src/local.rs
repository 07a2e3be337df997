//! Local file store: one file per object under a root directory.
//!
//! Storage location defaults to `~/.devloop/file_store`, so a session lives
//! at `~/.devloop/file_store/sessions/{sid}/events/{id}.json` and can be
//! inspected with ordinary tools.

use devloop_core::FileStore;
use devloop_core::error::StorageError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        debug!(root = %root.display(), "Local file store opened");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn io_error(path: &str, e: std::io::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io {
                path: path.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl FileStore for LocalFileStore {
    fn name(&self) -> &str {
        "local"
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), StorageError> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_error(path, e))?;
        }
        std::fs::write(&full, contents).map_err(|e| Self::io_error(path, e))
    }

    fn read(&self, path: &str) -> Result<String, StorageError> {
        std::fs::read_to_string(self.full_path(path)).map_err(|e| Self::io_error(path, e))
    }

    fn list(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let dir = std::fs::read_dir(self.full_path(path)).map_err(|e| Self::io_error(path, e))?;
        let base = path.trim_end_matches('/');
        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| Self::io_error(path, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                entries.push(format!("{base}/{name}"));
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path);
        let result = if full.is_dir() {
            std::fs::remove_dir_all(&full)
        } else {
            std::fs::remove_file(&full)
        };
        result.map_err(|e| Self::io_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devloop_core::{Action, Event, EventSource, EventStream};
    use std::sync::Arc;

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        store.write("sessions/x/events/0.json", "{}").unwrap();
        assert!(dir.path().join("sessions/x/events/0.json").exists());
        assert_eq!(store.read("sessions/x/events/0.json").unwrap(), "{}");
    }

    #[test]
    fn missing_paths_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        assert!(matches!(store.read("a.json"), Err(StorageError::NotFound(_))));
        assert!(matches!(store.list("sessions"), Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete("sessions"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn list_returns_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        store.write("sessions/x/agent_state.json", "{}").unwrap();
        store.write("sessions/x/events/0.json", "{}").unwrap();
        assert_eq!(store.list("sessions/x").unwrap(), vec!["sessions/x/agent_state.json"]);
    }

    #[tokio::test]
    async fn stream_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let stream = EventStream::new("disk", Arc::new(LocalFileStore::new(dir.path())));
            stream
                .add_event(Event::action(Action::message("first")), EventSource::User)
                .await
                .unwrap();
            stream
                .add_event(Event::action(Action::run("ls")), EventSource::Agent)
                .await
                .unwrap();
        }

        let stream = EventStream::new("disk", Arc::new(LocalFileStore::new(dir.path())));
        assert_eq!(stream.get_latest_event_id(), Some(1));
        let event = stream.get_event(1).unwrap();
        assert_eq!(event.as_action(), Some(&Action::run("ls")));
    }
}
