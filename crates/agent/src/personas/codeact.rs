//! The code-executing persona: bash, ipython, and browsing via delegation.

use super::{default_requirements, history_messages, push_merged, user_requested_exit};
use crate::agent::Agent;
use crate::parser::{FinishMode, ResponseParser};
use crate::state::State;
use async_trait::async_trait;
use devloop_core::error::AgentError;
use devloop_core::{Action, ContentPart, Message, Role};
use devloop_providers::Llm;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const STOP_WORDS: [&str; 3] = ["</execute_ipython>", "</execute_bash>", "</execute_browse>"];

const SYSTEM_PROMPT: &str = "\
You are a software engineer working in a sandboxed workspace.
Run shell commands inside <execute_bash> and </execute_bash>.
Run Python inside <execute_ipython> and </execute_ipython>.
To look something up on the web, describe it inside <execute_browse> and </execute_browse>.
Use one block per reply. When the task is done, reply with <finish></finish>.
If you need more information from the user, ask in plain text.";

pub struct CodeActAgent {
    llm: Arc<Llm>,
    parser: ResponseParser,
}

impl CodeActAgent {
    pub const NAME: &'static str = "codeact";

    pub fn new(llm: Arc<Llm>, delegate_agent: impl Into<String>) -> Self {
        Self {
            llm,
            parser: ResponseParser::codeact(delegate_agent),
        }
    }

    fn messages(&self, state: &State) -> Vec<Message> {
        let mut messages = vec![Message::system(SYSTEM_PROMPT)];
        if let Some(task) = state.inputs.get("task").and_then(Value::as_str) {
            messages.push(Message::user(task));
        }
        for message in history_messages(state, FinishMode::Thought) {
            push_merged(&mut messages, message);
        }

        let turns_left = state.max_iterations.saturating_sub(state.iteration);
        let reminder = format!("ENVIRONMENT REMINDER: You have {turns_left} turns left to complete the task.");
        match messages.last_mut() {
            Some(last) if last.role == Role::User => {
                last.content.push(ContentPart::Text { text: reminder })
            }
            _ => messages.push(Message::user(reminder)),
        }
        messages
    }
}

#[async_trait]
impl Agent for CodeActAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn step(&mut self, state: &State) -> Result<Action, AgentError> {
        if user_requested_exit(state) {
            return Ok(Action::finish(""));
        }
        let messages = self.messages(state);
        debug!(agent = Self::NAME, messages = messages.len(), "Querying LLM");
        let response = self.llm.completion(messages, &STOP_WORDS).await?;
        Ok(self.parser.parse(response.text()))
    }

    fn sandbox_requirements(&self) -> Vec<String> {
        default_requirements()
    }
}
