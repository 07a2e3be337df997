//! # devloop core
//!
//! Domain types, traits, and error definitions for the devloop agent runtime.
//! Everything other crates share lives here: the event model, the event
//! stream, and the seams (LLM provider, file store, runtime) that other
//! crates implement.
//!
//! ## Design Philosophy
//!
//! The event log is the single source of truth. Actions and observations
//! are closed tagged unions, published through [`EventStream`] and
//! projected into agent state by whoever subscribes.

pub mod action;
pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod observation;
pub mod provider;
pub mod runtime;
pub mod storage;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export key types at crate root for ergonomics
pub use action::Action;
pub use agent::{AgentState, TrafficControlState};
pub use error::{Error, Result};
pub use event::{Event, EventId, EventPayload, EventSource};
pub use message::{ContentPart, Message, Role};
pub use observation::Observation;
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use runtime::Runtime;
pub use storage::FileStore;
pub use stream::{EventCallback, EventFilter, EventIter, EventStream, SubscriberKey, callback};
