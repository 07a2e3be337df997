//! Runtime trait: the sandbox that turns runnable actions into observations.

use async_trait::async_trait;

use crate::action::Action;
use crate::error::RuntimeError;
use crate::observation::Observation;

/// Executes runnable actions.
///
/// `run_action` always yields exactly one observation; failures are
/// reported as `Observation::Error` rather than propagated.
#[async_trait]
pub trait Runtime: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare capabilities an agent declared (opaque tokens such as `"browsing"`).
    async fn init_requirements(&self, requirements: &[String]) -> Result<(), RuntimeError> {
        let _ = requirements;
        Ok(())
    }

    /// Execute one runnable action.
    async fn run_action(&self, action: &Action) -> Observation;
}

/// The error observation for action types a runtime cannot execute.
pub fn unsupported(action: &Action) -> Observation {
    Observation::error(RuntimeError::Unsupported(action.kind().to_string()).to_string())
}
