//! Shared test helpers: in-memory streams, scripted LLMs and agents, and
//! a runtime that echoes commands back.

use crate::agent::Agent;
use crate::state::State;
use async_trait::async_trait;
use devloop_config::LlmConfig;
use devloop_core::error::AgentError;
use devloop_core::{Action, EventStream, Observation, Runtime};
use devloop_providers::{Llm, ScriptedProvider};
use devloop_runtime::RuntimeSubscriber;
use devloop_storage::InMemoryFileStore;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn memory_stream(sid: &str) -> Arc<EventStream> {
    Arc::new(EventStream::new(sid, Arc::new(InMemoryFileStore::new())))
}

pub fn scripted_llm_with(texts: &[&str]) -> (Arc<Llm>, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::from_texts(texts.iter().copied()));
    let llm = Llm::new(provider.clone(), LlmConfig::default());
    (Arc::new(llm), provider)
}

pub fn scripted_llm(texts: &[&str]) -> Arc<Llm> {
    scripted_llm_with(texts).0
}

/// An agent that plays back a script, then repeats a fallback.
///
/// Without a fallback an exhausted script yields distinct messages.
pub struct ScriptedAgent {
    name: String,
    script: VecDeque<Result<Action, AgentError>>,
    fallback: Option<Action>,
    cost_per_step: f64,
    pub steps: Arc<AtomicUsize>,
    pub resets: Arc<AtomicUsize>,
}

impl ScriptedAgent {
    pub fn new(name: &str, script: Vec<Result<Action, AgentError>>) -> Self {
        Self {
            name: name.to_string(),
            script: script.into(),
            fallback: None,
            cost_per_step: 0.0,
            steps: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn actions(name: &str, actions: Vec<Action>) -> Self {
        Self::new(name, actions.into_iter().map(Ok).collect())
    }

    pub fn repeating(name: &str, action: Action) -> Self {
        let mut agent = Self::new(name, Vec::new());
        agent.fallback = Some(action);
        agent
    }

    pub fn with_cost_per_step(mut self, cost: f64) -> Self {
        self.cost_per_step = cost;
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn step(&mut self, state: &State) -> Result<Action, AgentError> {
        let n = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cost_per_step > 0.0 {
            state.metrics.add_cost("scripted", self.cost_per_step);
        }
        match self.script.pop_front() {
            Some(next) => next,
            None => Ok(self
                .fallback
                .clone()
                .unwrap_or_else(|| Action::message(format!("step {n}")))),
        }
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answers every shell command with `ran <command>`.
pub struct EchoRuntime;

#[async_trait]
impl Runtime for EchoRuntime {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run_action(&self, action: &Action) -> Observation {
        match action {
            Action::Run { command, .. } => Observation::Run {
                content: format!("ran {command}"),
                command_id: None,
                command: command.clone(),
                exit_code: 0,
            },
            other => devloop_core::runtime::unsupported(other),
        }
    }
}

pub fn attach_echo_runtime(stream: &Arc<EventStream>) {
    RuntimeSubscriber::attach(stream, Arc::new(EchoRuntime));
}
