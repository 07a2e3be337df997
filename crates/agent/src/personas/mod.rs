//! Built-in personas and the history-to-messages rendering they share.
//!
//! Agent actions are rendered back into the tag grammar the parser reads,
//! observations become `OBSERVATION:` user turns, and consecutive turns
//! from one role are merged.

mod codeact;
mod searcher;

pub use codeact::CodeActAgent;
pub use searcher::SearcherAgent;

use crate::parser::{FinishMode, render};
use crate::state::State;
use devloop_core::{Action, Event, EventPayload, EventSource, Message, Observation, Role};

const OBSERVATION_PREFIX: &str = "OBSERVATION:\n";

/// Capabilities both personas expect from the runtime.
pub(crate) fn default_requirements() -> Vec<String> {
    vec!["agent_skills".into(), "jupyter".into()]
}

/// Whether the latest user message asks the agent to stop.
pub(crate) fn user_requested_exit(state: &State) -> bool {
    state
        .current_user_intent()
        .is_some_and(|(content, _)| content.trim() == "/exit")
}

/// Append `message`, merging it into the previous one when the roles match.
pub(crate) fn push_merged(messages: &mut Vec<Message>, message: Message) {
    match messages.last_mut() {
        Some(last) if last.role == message.role => last.content.extend(message.content),
        _ => messages.push(message),
    }
}

/// The state's history as conversation turns.
pub(crate) fn history_messages(state: &State, finish_mode: FinishMode) -> Vec<Message> {
    let mut messages = Vec::new();
    for event in state.history.events() {
        if let Some(message) = event_message(&event, finish_mode) {
            push_merged(&mut messages, message);
        }
    }
    messages
}

fn event_message(event: &Event, finish_mode: FinishMode) -> Option<Message> {
    match &event.payload {
        EventPayload::Action(action) => {
            let role = if event.source == Some(EventSource::User) {
                Role::User
            } else {
                Role::Assistant
            };
            match action {
                Action::Message {
                    content, images, ..
                } => Some(Message::new(role, content.clone()).with_images(images.clone())),
                other => render(other, finish_mode).map(|text| Message::new(role, text)),
            }
        }
        EventPayload::Observation(observation) => observation_text(observation).map(Message::user),
    }
}

fn observation_text(observation: &Observation) -> Option<String> {
    match observation {
        Observation::Run {
            content, exit_code, ..
        } => Some(format!(
            "{OBSERVATION_PREFIX}{content}\n[Command finished with exit code {exit_code}]"
        )),
        Observation::Error { content } => Some(format!(
            "{OBSERVATION_PREFIX}{content}\n[Error occurred in processing last action]"
        )),
        Observation::Null { .. } | Observation::AgentStateChanged { .. } => None,
        other => Some(format!("{OBSERVATION_PREFIX}{}", other.content())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::memory_stream;
    use std::sync::Arc;

    #[tokio::test]
    async fn history_renders_as_alternating_turns() {
        let stream = memory_stream("s");
        let mut state = State::new(10);
        state.history.attach(Arc::clone(&stream));

        stream
            .add_event(Event::action(Action::message("list files")), EventSource::User)
            .await
            .unwrap();
        let run = stream
            .add_event(
                Event::action(Action::Run {
                    command: "ls".into(),
                    thought: "look around".into(),
                    background: false,
                }),
                EventSource::Agent,
            )
            .await
            .unwrap();
        stream
            .add_event(
                Event::observation(Observation::Run {
                    content: "a.txt".into(),
                    command_id: Some(run),
                    command: "ls".into(),
                    exit_code: 0,
                })
                .with_cause(run),
                EventSource::Environment,
            )
            .await
            .unwrap();
        stream
            .add_event(Event::observation(Observation::error("disk full")), EventSource::Environment)
            .await
            .unwrap();

        let messages = history_messages(&state, FinishMode::Thought);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(
            messages[1].text(),
            "look around\n<execute_bash>\nls\n</execute_bash>"
        );
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(
            messages[2].text(),
            "OBSERVATION:\na.txt\n[Command finished with exit code 0]\nOBSERVATION:\ndisk full\n[Error occurred in processing last action]"
        );
    }

    #[tokio::test]
    async fn exit_request() {
        let stream = memory_stream("s");
        let mut state = State::new(10);
        state.history.attach(Arc::clone(&stream));
        assert!(!user_requested_exit(&state));
        stream
            .add_event(Event::action(Action::message(" /exit ")), EventSource::User)
            .await
            .unwrap();
        assert!(user_requested_exit(&state));
    }
}
