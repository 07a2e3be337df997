//! File store implementations for devloop.
//!
//! Both backends implement [`devloop_core::FileStore`]; pick one with
//! [`from_backend`].

pub mod in_memory;
pub mod local;

pub use in_memory::InMemoryFileStore;
pub use local::LocalFileStore;

use devloop_core::FileStore;
use std::path::Path;
use std::sync::Arc;

/// Build the store named by the `[storage] backend` config key.
pub fn from_backend(backend: &str, root: &Path) -> Option<Arc<dyn FileStore>> {
    match backend {
        "memory" => Some(Arc::new(InMemoryFileStore::new())),
        "local" => Some(Arc::new(LocalFileStore::new(root))),
        _ => None,
    }
}
