//! Observations: results of actions and unsolicited environment notices.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::AgentState;
use crate::event::EventId;

/// Tagged by the `observation` discriminator on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "observation", rename_all = "snake_case")]
pub enum Observation {
    /// Output of a shell command.
    Run {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_id: Option<EventId>,
        command: String,
        exit_code: i32,
    },

    /// Output of a code cell.
    RunIpython { content: String, code: String },

    Read { path: String, content: String },

    Write { path: String, content: String },

    Browse {
        url: String,
        content: String,
        #[serde(default)]
        error: bool,
    },

    Error { content: String },

    /// Result of a finished delegate: its outputs plus a one-line summary.
    Delegate {
        #[serde(default)]
        outputs: Map<String, Value>,
        content: String,
    },

    AgentStateChanged {
        agent_state: AgentState,
        #[serde(default)]
        content: String,
    },

    Null {
        #[serde(default)]
        content: String,
    },
}

impl Observation {
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// The human-readable body of the observation.
    pub fn content(&self) -> &str {
        match self {
            Self::Run { content, .. }
            | Self::RunIpython { content, .. }
            | Self::Read { content, .. }
            | Self::Write { content, .. }
            | Self::Browse { content, .. }
            | Self::Error { content }
            | Self::Delegate { content, .. }
            | Self::AgentStateChanged { content, .. }
            | Self::Null { content } => content,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The wire discriminator of this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::RunIpython { .. } => "run_ipython",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Browse { .. } => "browse",
            Self::Error { .. } => "error",
            Self::Delegate { .. } => "delegate",
            Self::AgentStateChanged { .. } => "agent_state_changed",
            Self::Null { .. } => "null",
        }
    }

    /// Equality that ignores per-execution identifiers.
    pub fn similar(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Run { content: a, command: ca, exit_code: ea, .. },
                Self::Run { content: b, command: cb, exit_code: eb, .. },
            ) => a == b && ca == cb && ea == eb,
            _ => self == other,
        }
    }
}
