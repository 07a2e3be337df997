//! Subcommand implementations and the event formatting they share.

pub mod agents;
pub mod config;
pub mod events;
pub mod run;

use devloop_config::AppConfig;
use devloop_core::{Action, Event, EventPayload, FileStore, Observation};
use std::sync::Arc;

const SUMMARY_WIDTH: usize = 100;

/// Open the event store named in the config.
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn FileStore>, Box<dyn std::error::Error>> {
    devloop_storage::from_backend(&config.storage.backend, &config.storage.path).ok_or_else(|| {
        format!("Unknown storage backend: {}", config.storage.backend).into()
    })
}

/// One line per event: id, time, source, kind and a short summary.
pub fn describe(event: &Event) -> String {
    let id = event.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let time = event
        .timestamp
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let source = event.source.map(|s| s.to_string()).unwrap_or_default();
    let cause = event.cause.map(|c| format!(" (cause {c})")).unwrap_or_default();
    format!(
        "[{id:>4}] {time} {source:<11} {:<20} {}{cause}",
        event.kind(),
        truncate(&summary(event), SUMMARY_WIDTH)
    )
}

fn summary(event: &Event) -> String {
    match &event.payload {
        EventPayload::Action(action) => match action {
            Action::Run { command, .. } => command.clone(),
            Action::RunIpython { code, .. } => code.clone(),
            Action::Read { path, .. } | Action::Write { path, .. } => path.clone(),
            Action::Browse { url, .. } => url.clone(),
            Action::Delegate { agent, inputs, .. } => {
                let task = inputs.get("task").and_then(|t| t.as_str()).unwrap_or_default();
                format!("{agent}: {task}")
            }
            Action::Message { content, .. } => content.clone(),
            Action::ChangeAgentState { agent_state, .. } => agent_state.clone(),
            Action::AddTask { goal, .. } => goal.clone(),
            Action::ModifyTask { task_id, state, .. } => format!("{task_id} -> {state}"),
            other => other.thought().to_string(),
        },
        EventPayload::Observation(observation) => match observation {
            Observation::AgentStateChanged { agent_state, .. } => agent_state.to_string(),
            Observation::Run {
                content, exit_code, ..
            } => format!("exit {exit_code}: {content}"),
            other => other.content().to_string(),
        },
    }
}

/// First line of `text`, cut to `width` characters.
fn truncate(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    let more_lines = text.lines().nth(1).is_some();
    if line.chars().count() > width {
        let cut: String = line.chars().take(width).collect();
        format!("{cut}...")
    } else if more_lines {
        format!("{line} ...")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devloop_core::EventSource;

    #[test]
    fn describe_includes_kind_source_and_cause() {
        let mut event = Event::observation(Observation::Run {
            content: "a.txt\nb.txt".into(),
            command_id: Some(3),
            command: "ls".into(),
            exit_code: 0,
        })
        .with_cause(3);
        event.id = Some(4);
        event.source = Some(EventSource::Environment);

        let line = describe(&event);
        assert!(line.starts_with("[   4]"));
        assert!(line.contains("environment"));
        assert!(line.contains("run"));
        assert!(line.contains("exit 0: a.txt ..."));
        assert!(line.ends_with("(cause 3)"));
    }

    #[test]
    fn long_lines_are_cut() {
        let long = "x".repeat(150);
        let cut = truncate(&long, 10);
        assert_eq!(cut, "xxxxxxxxxx...");
        assert_eq!(truncate("short", 10), "short");
    }
}
