//! File store trait: durable key/value storage with path-like keys.
//!
//! Keys are `/`-separated relative paths. The event log lays sessions out as
//! `sessions/{sid}/events/{id}.json`, with the controller's checkpoint next
//! to them at `sessions/{sid}/agent_state.json`.

use crate::error::StorageError;
use crate::event::EventId;

/// Durable storage for the event log and state checkpoints.
///
/// Calls are synchronous: every write is a small JSON document.
pub trait FileStore: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Create or replace the object at `path`.
    fn write(&self, path: &str, contents: &str) -> Result<(), StorageError>;

    /// Read the object at `path`. Missing objects are `StorageError::NotFound`.
    fn read(&self, path: &str) -> Result<String, StorageError>;

    /// List the full paths of objects directly under the directory `path`.
    fn list(&self, path: &str) -> Result<Vec<String>, StorageError>;

    /// Delete an object, or everything under a directory prefix.
    fn delete(&self, path: &str) -> Result<(), StorageError>;
}

pub fn session_dir(sid: &str) -> String {
    format!("sessions/{sid}")
}

pub fn events_dir(sid: &str) -> String {
    format!("sessions/{sid}/events")
}

pub fn event_path(sid: &str, id: EventId) -> String {
    format!("sessions/{sid}/events/{id}.json")
}

pub fn agent_state_path(sid: &str) -> String {
    format!("sessions/{sid}/agent_state.json")
}

/// Parse the event id out of a persisted event path (`.../17.json` → 17).
pub fn event_id_from_path(path: &str) -> Option<EventId> {
    path.rsplit('/').next()?.strip_suffix(".json")?.parse().ok()
}
