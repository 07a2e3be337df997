//! The read-only searching persona, usually run as a delegate.

use super::{default_requirements, history_messages, push_merged, user_requested_exit};
use crate::agent::Agent;
use crate::parser::{FinishMode, ResponseParser};
use crate::state::State;
use async_trait::async_trait;
use devloop_core::error::AgentError;
use devloop_core::{Action, Message};
use devloop_providers::Llm;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const STOP_WORDS: [&str; 3] = ["</execute_ipython>", "</execute_bash>", "</finish>"];

pub struct SearcherAgent {
    llm: Arc<Llm>,
    parser: ResponseParser,
}

impl SearcherAgent {
    pub const NAME: &'static str = "searcher";

    pub fn new(llm: Arc<Llm>) -> Self {
        Self {
            llm,
            parser: ResponseParser::searcher(),
        }
    }

    fn system_prompt(state: &State) -> String {
        let input = |key: &str| {
            state
                .inputs
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let mut prompt = format!(
            "You gather information about a codebase so another engineer can act on it.\n\
             Never change files. Only run commands without side effects, such as ls and grep.\n\
             Run shell commands inside <execute_bash> and </execute_bash>.\n\
             Run Python inside <execute_ipython> and </execute_ipython>.\n\
             When you have what is needed, summarize it and end with <finish></finish>.\n\n\
             Task:\n{}",
            input("task")
        );
        let approach = input("suggested_approach");
        if !approach.is_empty() {
            prompt.push_str(&format!("\n\nSuggested approach:\n{approach}"));
        }
        prompt
    }
}

#[async_trait]
impl Agent for SearcherAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn step(&mut self, state: &State) -> Result<Action, AgentError> {
        if user_requested_exit(state) {
            return Ok(Action::finish(""));
        }
        let mut messages = vec![Message::system(Self::system_prompt(state))];
        for message in history_messages(state, FinishMode::Outputs) {
            push_merged(&mut messages, message);
        }
        debug!(agent = Self::NAME, messages = messages.len(), "Querying LLM");
        let response = self.llm.completion(messages, &STOP_WORDS).await?;
        Ok(self.parser.parse(response.text()))
    }

    fn sandbox_requirements(&self) -> Vec<String> {
        default_requirements()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::scripted_llm_with;

    #[tokio::test]
    async fn finish_hands_back_outputs() {
        let (llm, provider) = scripted_llm_with(&["The parser lives in src/parser.rs\n<finish>"]);
        let mut agent = SearcherAgent::new(llm);
        let mut inputs = serde_json::Map::new();
        inputs.insert("task".into(), "find the parser".into());
        inputs.insert("suggested_approach".into(), "grep for parse".into());
        let state = State::new(5).with_inputs(inputs);

        match agent.step(&state).await.unwrap() {
            Action::Finish { outputs, .. } => {
                assert_eq!(outputs["output"], "The parser lives in src/parser.rs");
            }
            other => panic!("expected finish, got {other:?}"),
        }

        let request = provider.last_request().unwrap();
        assert_eq!(request.messages.len(), 1);
        let system = request.messages[0].text();
        assert!(system.contains("Task:\nfind the parser"));
        assert!(system.ends_with("Suggested approach:\ngrep for parse"));
        assert_eq!(request.stop, STOP_WORDS);
    }
}
