//! Actions: events that express an agent's (or user's) intent.
//!
//! The set of actions is closed. Each variant is tagged on the wire by the
//! `action` discriminator, e.g. `{"action": "run", "command": "ls"}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything an agent or user can ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Run a shell command in the sandbox.
    Run {
        command: String,
        #[serde(default)]
        thought: String,
        #[serde(default)]
        background: bool,
    },

    /// Run a code cell in an interactive kernel.
    RunIpython {
        code: String,
        #[serde(default)]
        thought: String,
        #[serde(default)]
        kernel_init_code: String,
    },

    /// Read a file, optionally a line range.
    Read {
        path: String,
        #[serde(default)]
        start: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<usize>,
        #[serde(default)]
        thought: String,
    },

    /// Write a file, optionally replacing a line range.
    Write {
        path: String,
        content: String,
        #[serde(default)]
        start: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<usize>,
        #[serde(default)]
        thought: String,
    },

    Browse {
        url: String,
        #[serde(default)]
        thought: String,
    },

    /// Hand a sub-task to another agent.
    Delegate {
        agent: String,
        #[serde(default)]
        inputs: Map<String, Value>,
        #[serde(default)]
        thought: String,
    },

    /// A chat message. From the agent, `wait_for_response` hands the turn back to the user.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
        #[serde(default)]
        wait_for_response: bool,
    },

    /// Request a controller state transition. The target is kept as text
    /// so unknown values can be rejected by the controller.
    ChangeAgentState {
        agent_state: String,
        #[serde(default)]
        thought: String,
    },

    AddTask {
        parent: String,
        goal: String,
        #[serde(default)]
        subtasks: Vec<Value>,
        #[serde(default)]
        thought: String,
    },

    ModifyTask {
        task_id: String,
        state: String,
        #[serde(default)]
        thought: String,
    },

    Finish {
        #[serde(default)]
        outputs: Map<String, Value>,
        #[serde(default)]
        thought: String,
    },

    Reject {
        #[serde(default)]
        outputs: Map<String, Value>,
        #[serde(default)]
        thought: String,
    },

    /// No-op; never published.
    Null,
}

impl Action {
    /// Shell command shorthand.
    pub fn run(command: impl Into<String>) -> Self {
        Self::Run {
            command: command.into(),
            thought: String::new(),
            background: false,
        }
    }

    /// A user message; the controller treats these as "start working".
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            images: Vec::new(),
            wait_for_response: false,
        }
    }

    pub fn finish(thought: impl Into<String>) -> Self {
        Self::Finish {
            outputs: Map::new(),
            thought: thought.into(),
        }
    }

    pub fn change_state(state: impl std::fmt::Display) -> Self {
        Self::ChangeAgentState {
            agent_state: state.to_string(),
            thought: String::new(),
        }
    }

    /// Whether the runtime must execute this action to produce an observation.
    pub fn runnable(&self) -> bool {
        matches!(
            self,
            Self::Run { .. }
                | Self::RunIpython { .. }
                | Self::Read { .. }
                | Self::Write { .. }
                | Self::Browse { .. }
        )
    }

    /// The free-text rationale attached to the action, if it has one.
    pub fn thought(&self) -> &str {
        match self {
            Self::Run { thought, .. }
            | Self::RunIpython { thought, .. }
            | Self::Read { thought, .. }
            | Self::Write { thought, .. }
            | Self::Browse { thought, .. }
            | Self::Delegate { thought, .. }
            | Self::ChangeAgentState { thought, .. }
            | Self::AddTask { thought, .. }
            | Self::ModifyTask { thought, .. }
            | Self::Finish { thought, .. }
            | Self::Reject { thought, .. } => thought,
            Self::Message { .. } | Self::Null => "",
        }
    }

    /// The wire discriminator of this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::RunIpython { .. } => "run_ipython",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Browse { .. } => "browse",
            Self::Delegate { .. } => "delegate",
            Self::Message { .. } => "message",
            Self::ChangeAgentState { .. } => "change_agent_state",
            Self::AddTask { .. } => "add_task",
            Self::ModifyTask { .. } => "modify_task",
            Self::Finish { .. } => "finish",
            Self::Reject { .. } => "reject",
            Self::Null => "null",
        }
    }
}
