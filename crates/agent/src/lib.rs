//! The agent side of devloop: personas, the response parser, per-run
//! state, and the controller that drives them.
//!
//! A run looks like this:
//!
//! 1. A user message lands on the [`devloop_core::EventStream`]
//! 2. The [`AgentController`] moves to RUNNING and steps its [`Agent`]
//! 3. The agent asks the LLM and the [`ResponseParser`] turns the reply into an action
//! 4. Runnable actions go to the runtime; the controller waits for the observation
//! 5. Delegate actions spawn a child controller that the parent steps in lockstep
//!
//! The loop ends when the agent finishes or rejects, hits a limit, gets
//! stuck, or fails.

pub mod agent;
pub mod controller;
pub mod history;
pub mod parser;
pub mod personas;
pub mod registry;
pub mod state;
pub mod stuck;
pub mod task;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent::Agent;
pub use controller::{
    AgentController, ControllerConfig, ControllerHandle, TRAFFIC_CONTROL_REMINDER, TickOutcome,
};
pub use history::History;
pub use parser::{ActionMatcher, FinishMode, ResponseParser};
pub use personas::{CodeActAgent, SearcherAgent};
pub use registry::{AgentFactory, AgentRegistry};
pub use state::State;
pub use stuck::StuckDetector;
pub use task::{RootTask, Task, TaskState};
