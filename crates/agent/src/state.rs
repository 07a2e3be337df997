//! Per-controller run state and its checkpoint.

use crate::history::History;
use crate::task::RootTask;
use devloop_core::error::{AgentError, StorageError};
use devloop_core::storage::agent_state_path;
use devloop_core::{AgentState, FileStore, TrafficControlState};
use devloop_telemetry::MetricsHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// States a checkpoint resumes into rather than restores verbatim.
const RESUMABLE_STATES: [AgentState; 3] = [
    AgentState::Running,
    AgentState::Paused,
    AgentState::AwaitingUserInput,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub root_task: RootTask,
    /// Steps taken so far; incremented before each agent step.
    pub iteration: u32,
    pub max_iterations: u32,
    pub agent_state: AgentState,
    /// Applied once the controller has rewired a restored state.
    #[serde(default)]
    pub resume_state: Option<AgentState>,
    #[serde(default)]
    pub traffic_control_state: TrafficControlState,
    /// Shared with the LLM client and every delegate of this task.
    #[serde(default)]
    pub metrics: MetricsHandle,
    #[serde(default)]
    pub history: History,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Nesting depth; the root controller is 0.
    #[serde(default)]
    pub delegate_level: u32,
}

impl State {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            root_task: RootTask::default(),
            iteration: 0,
            max_iterations,
            agent_state: AgentState::Loading,
            resume_state: None,
            traffic_control_state: TrafficControlState::Normal,
            metrics: MetricsHandle::new(),
            history: History::default(),
            inputs: Map::new(),
            outputs: Map::new(),
            last_error: None,
            delegate_level: 0,
        }
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_delegate_level(mut self, level: u32) -> Self {
        self.delegate_level = level;
        self
    }

    /// Latest user message: its text and any image urls.
    pub fn current_user_intent(&self) -> Option<(String, Vec<String>)> {
        self.history.last_user_message()
    }

    pub fn save_to_session(&self, sid: &str, store: &dyn FileStore) -> Result<(), AgentError> {
        let json = serde_json::to_string(self)?;
        store.write(&agent_state_path(sid), &json)?;
        debug!(sid = %sid, iteration = self.iteration, agent_state = %self.agent_state, "State saved");
        Ok(())
    }

    /// Load a checkpoint, parking a resumable state in `resume_state`.
    pub fn restore_from_session(sid: &str, store: &dyn FileStore) -> Result<Self, AgentError> {
        let json = store.read(&agent_state_path(sid))?;
        let mut state: State = serde_json::from_str(&json)?;
        if RESUMABLE_STATES.contains(&state.agent_state) {
            state.resume_state = Some(state.agent_state);
            state.agent_state = AgentState::Init;
        }
        info!(
            sid = %sid,
            iteration = state.iteration,
            resume_state = ?state.resume_state,
            "State restored"
        );
        Ok(state)
    }

    /// Like [`State::restore_from_session`], but a missing checkpoint is `None`.
    pub fn try_restore(sid: &str, store: &dyn FileStore) -> Result<Option<Self>, AgentError> {
        match Self::restore_from_session(sid, store) {
            Ok(state) => Ok(Some(state)),
            Err(AgentError::Storage(StorageError::NotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
