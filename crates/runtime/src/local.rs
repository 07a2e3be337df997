//! Local runtime: shell commands and file access inside a workspace directory.

use async_trait::async_trait;
use devloop_core::error::RuntimeError;
use devloop_core::{Action, Observation, Runtime};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct LocalRuntime {
    workspace: PathBuf,
    timeout: Duration,
}

impl LocalRuntime {
    pub fn new(workspace: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workspace: workspace.into(),
            timeout,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve `path` against the workspace, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf, RuntimeError> {
        let candidate = Path::new(path);
        let relative = match candidate.strip_prefix(&self.workspace) {
            Ok(rel) => rel,
            Err(_) if candidate.is_absolute() => {
                return Err(RuntimeError::PathOutsideWorkspace(path.to_string()));
            }
            Err(_) => candidate,
        };
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(RuntimeError::PathOutsideWorkspace(path.to_string()));
        }
        Ok(self.workspace.join(relative))
    }

    async fn run_command(&self, command: &str) -> Result<Observation, RuntimeError> {
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| RuntimeError::Io(e.to_string()))?;

        debug!(command = %command, workspace = %self.workspace.display(), "Executing shell command");

        let child = Command::new("sh")
            .args(["-c", command])
            .current_dir(&self.workspace)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| RuntimeError::Timeout {
                command: command.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| RuntimeError::Io(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(command = %command, exit_code, "Command failed");
        }

        let content = if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{stdout}{stderr}")
        };

        Ok(Observation::Run {
            content: content.trim_end().to_string(),
            command_id: None,
            command: command.to_string(),
            exit_code,
        })
    }

    async fn read(
        &self,
        path: &str,
        start: usize,
        end: Option<usize>,
    ) -> Result<Observation, RuntimeError> {
        let full = self.resolve(path)?;
        let text = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| RuntimeError::Io(format!("{path}: {e}")))?;

        let content = if start == 0 && end.is_none() {
            text
        } else {
            let lines: Vec<&str> = text.lines().collect();
            let end = end.unwrap_or(lines.len()).min(lines.len());
            lines.get(start.min(end)..end).unwrap_or_default().join("\n")
        };

        Ok(Observation::Read {
            path: path.to_string(),
            content,
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &str,
        start: usize,
        end: Option<usize>,
    ) -> Result<Observation, RuntimeError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RuntimeError::Io(e.to_string()))?;
        }

        let new_text = if start == 0 && end.is_none() {
            content.to_string()
        } else {
            let existing = match tokio::fs::read_to_string(&full).await {
                Ok(existing) => existing,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(RuntimeError::Io(format!("{path}: {e}"))),
            };
            let mut lines: Vec<&str> = existing.lines().collect();
            let end = end.unwrap_or(lines.len()).min(lines.len());
            let start = start.min(end);
            lines.splice(start..end, content.lines());
            let mut joined = lines.join("\n");
            joined.push('\n');
            joined
        };

        tokio::fs::write(&full, &new_text)
            .await
            .map_err(|e| RuntimeError::Io(format!("{path}: {e}")))?;

        Ok(Observation::Write {
            path: path.to_string(),
            content: format!("Wrote {} bytes to {path}", new_text.len()),
        })
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    async fn init_requirements(&self, requirements: &[String]) -> Result<(), RuntimeError> {
        if !requirements.is_empty() {
            debug!(?requirements, "Local runtime has no extra capabilities to initialize");
        }
        Ok(())
    }

    async fn run_action(&self, action: &Action) -> Observation {
        let result = match action {
            Action::Run { command, .. } => self.run_command(command).await,
            Action::Read { path, start, end, .. } => self.read(path, *start, *end).await,
            Action::Write { path, content, start, end, .. } => {
                self.write(path, content, *start, *end).await
            }
            other => return devloop_core::runtime::unsupported(other),
        };
        result.unwrap_or_else(|e| Observation::error(e.to_string()))
    }
}
