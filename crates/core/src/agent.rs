//! Agent lifecycle states and traffic-control flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a controller's agent.
///
/// `Stopped` is transient: the controller resets and moves on to
/// `AwaitingUserInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Loading,
    Init,
    Running,
    AwaitingUserInput,
    Paused,
    Stopped,
    Finished,
    Rejected,
    Error,
}

impl AgentState {
    /// States after which the agent will not step again without outside help.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Rejected | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Init => "init",
            Self::Running => "running",
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loading" => Ok(Self::Loading),
            "init" => Ok(Self::Init),
            "running" => Ok(Self::Running),
            "awaiting_user_input" => Ok(Self::AwaitingUserInput),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "finished" => Ok(Self::Finished),
            "rejected" => Ok(Self::Rejected),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown agent state: {other}")),
        }
    }
}

/// Throttle flag for iteration and budget ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficControlState {
    #[default]
    Normal,
    /// A limit was hit and the agent was paused.
    Throttling,
    /// The user resumed past the limit; the next limit check lets one step through.
    Paused,
}
