//! The agent contract: a decision function from state to the next action.

use crate::state::State;
use async_trait::async_trait;
use devloop_core::Action;
use devloop_core::error::AgentError;

/// A persona driven by an [`AgentController`](crate::AgentController).
///
/// `step` may be called zero or many times per observation, depending on
/// pending-action backpressure, so it must not rely on being called once
/// per event. Anything it wants to remember across steps lives in fields
/// that `reset` clears.
#[async_trait]
pub trait Agent: Send {
    /// Registry name, e.g. `"codeact"`.
    fn name(&self) -> &str;

    /// Decide the next action.
    ///
    /// `MalformedAction`, `NoAction` and `LlmResponse` errors are reported
    /// back to the model; any other error ends the run.
    async fn step(&mut self, state: &State) -> Result<Action, AgentError>;

    /// Forget persona-local progress before a fresh task.
    fn reset(&mut self) {}

    /// Opaque capability tokens the runtime should prepare.
    fn sandbox_requirements(&self) -> Vec<String> {
        Vec::new()
    }
}
