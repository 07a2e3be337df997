//! The hierarchical task tree agents maintain with add/modify-task actions.
//!
//! Top-level tasks are numbered `"0"`, `"1"`, ...; a subtask's id extends
//! its parent's with `.n`, so `"0.1"` is the second child of task `"0"`.

use devloop_core::error::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Open,
    InProgress,
    Completed,
    Abandoned,
    Verified,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Verified => "verified",
        }
    }

    /// Completed, abandoned or verified.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::Verified)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            "verified" => Ok(Self::Verified),
            other => Err(AgentError::Task(format!("Invalid task state: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Task>,
}

impl Task {
    fn new(id: String, goal: impl Into<String>) -> Self {
        Self {
            id,
            goal: goal.into(),
            state: TaskState::Open,
            subtasks: Vec::new(),
        }
    }

    /// Build a task from `{"goal": ..., "subtasks": [...]}`.
    fn from_value(id: String, value: &Value) -> Result<Self, AgentError> {
        let goal = value
            .get("goal")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Task(format!("Subtask {id} has no goal")))?;
        let mut task = Self::new(id, goal);
        if let Some(children) = value.get("subtasks").and_then(Value::as_array) {
            task.push_subtasks(children)?;
        }
        Ok(task)
    }

    fn child_id(&self, index: usize) -> String {
        if self.id.is_empty() {
            index.to_string()
        } else {
            format!("{}.{index}", self.id)
        }
    }

    fn push_subtasks(&mut self, children: &[Value]) -> Result<(), AgentError> {
        for child in children {
            let id = self.child_id(self.subtasks.len());
            let task = Self::from_value(id, child)?;
            self.subtasks.push(task);
        }
        Ok(())
    }

    /// Close this task and every descendant that is still open or in progress.
    fn close(&mut self, state: TaskState) {
        self.state = state;
        for subtask in &mut self.subtasks {
            if !subtask.state.is_closed() {
                subtask.close(state);
            }
        }
    }
}

/// The task tree root. Its own id is the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootTask {
    #[serde(flatten)]
    root: Task,
}

impl Default for RootTask {
    fn default() -> Self {
        Self {
            root: Task::new(String::new(), ""),
        }
    }
}

impl RootTask {
    pub fn subtasks(&self) -> &[Task] {
        &self.root.subtasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        let mut task = &self.root;
        for index in path(id)? {
            task = task.subtasks.get(index)?;
        }
        Some(task)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Task, AgentError> {
        let unknown = || AgentError::Task(format!("Task {id} does not exist"));
        let mut task = &mut self.root;
        for index in path(id).ok_or_else(unknown)? {
            task = task.subtasks.get_mut(index).ok_or_else(unknown)?;
        }
        Ok(task)
    }

    /// Add a child under `parent_id` (`""` for top level) with optional nested subtasks.
    pub fn add_subtask(
        &mut self,
        parent_id: &str,
        goal: &str,
        subtasks: &[Value],
    ) -> Result<String, AgentError> {
        let parent = self.get_mut(parent_id)?;
        let id = parent.child_id(parent.subtasks.len());
        let mut task = Task::new(id.clone(), goal);
        task.push_subtasks(subtasks)?;
        parent.subtasks.push(task);
        Ok(id)
    }

    /// Set a task's state. Closing cascades down; starting work marks the ancestors in progress.
    pub fn set_subtask_state(&mut self, id: &str, state: &str) -> Result<(), AgentError> {
        let state: TaskState = state.parse()?;
        if id.is_empty() {
            return Err(AgentError::Task("The root task cannot change state".into()));
        }
        let task = self.get_mut(id)?;
        if state.is_closed() {
            task.close(state);
        } else {
            task.state = state;
        }

        if state == TaskState::InProgress {
            let mut ancestor = id;
            while let Some((parent, _)) = ancestor.rsplit_once('.') {
                self.get_mut(parent)?.state = TaskState::InProgress;
                ancestor = parent;
            }
        }
        Ok(())
    }

    /// Indented outline, one task per line.
    pub fn outline(&self) -> String {
        fn walk(task: &Task, depth: usize, out: &mut Vec<String>) {
            for sub in &task.subtasks {
                out.push(format!(
                    "{}{} [{}] {}",
                    "  ".repeat(depth),
                    sub.id,
                    sub.state,
                    sub.goal
                ));
                walk(sub, depth + 1, out);
            }
        }
        let mut lines = Vec::new();
        walk(&self.root, 0, &mut lines);
        lines.join("\n")
    }
}

fn path(id: &str) -> Option<Vec<usize>> {
    if id.is_empty() {
        return Some(Vec::new());
    }
    id.split('.').map(|part| part.parse().ok()).collect()
}
