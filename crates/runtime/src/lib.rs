//! Runtimes execute runnable actions and report observations.
//!
//! [`LocalRuntime`] runs shell commands and file I/O directly on the host,
//! scoped to a workspace directory. [`RuntimeSubscriber`] wires any
//! [`devloop_core::Runtime`] to an event stream.

pub mod local;
pub mod subscriber;

pub use local::LocalRuntime;
pub use subscriber::RuntimeSubscriber;
