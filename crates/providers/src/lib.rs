//! LLM access for devloop.
//!
//! [`Llm`] wraps any [`devloop_core::Provider`] with the request timeout,
//! bounded retry and cost accounting agents rely on. Concrete network
//! backends plug in behind the `Provider` trait; [`ScriptedProvider`]
//! replays canned completions for offline runs and tests.

pub mod llm;
pub mod scripted;

pub use llm::{Llm, LlmResponse};
pub use scripted::ScriptedProvider;
