//! Name-to-constructor lookup for personas.

use crate::agent::Agent;
use crate::personas::{CodeActAgent, SearcherAgent};
use devloop_core::error::AgentError;
use devloop_providers::Llm;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type AgentFactory = Arc<dyn Fn(Arc<Llm>) -> Box<dyn Agent> + Send + Sync>;

/// Builds agents by name; delegation looks personas up here.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: BTreeMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `codeact` and `searcher`, with browse blocks delegated to `delegate_agent`.
    pub fn with_defaults(delegate_agent: &str) -> Self {
        let delegate_agent = delegate_agent.to_string();
        let mut registry = Self::new();
        registry.register(CodeActAgent::NAME, move |llm| {
            Box::new(CodeActAgent::new(llm, delegate_agent.clone()))
        });
        registry.register(SearcherAgent::NAME, |llm| Box::new(SearcherAgent::new(llm)));
        registry
    }

    /// Register a constructor. A second registration under one name replaces the first.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Arc<Llm>) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str, llm: Arc<Llm>) -> Result<Box<dyn Agent>, AgentError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))?;
        Ok(factory(llm))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
