//! A provider that replays canned completions.
//!
//! Used by `devloop run --script` for offline sessions and throughout the
//! test suites. A script file holds one completion per block, blocks
//! separated by a line containing only `---`.

use async_trait::async_trait;
use devloop_core::error::ProviderError;
use devloop_core::{Provider, ProviderRequest, ProviderResponse, Usage};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// One successful completion per text.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            texts
                .into_iter()
                .map(|t| Ok(Self::response(t)))
                .collect(),
        )
    }

    /// Parse a script: completions separated by `---` lines.
    pub fn from_script(script: &str) -> Self {
        let mut blocks = vec![String::new()];
        for line in script.lines() {
            if line.trim() == "---" {
                blocks.push(String::new());
                continue;
            }
            if let Some(current) = blocks.last_mut() {
                if !current.is_empty() {
                    current.push('\n');
                }
                current.push_str(line);
            }
        }
        Self::from_texts(
            blocks
                .into_iter()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty()),
        )
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A successful response with a rough token count.
    pub fn response(text: impl Into<String>) -> ProviderResponse {
        let text = text.into();
        let completion_tokens = (text.len() / 4) as u32;
        ProviderResponse {
            choices: vec![text],
            usage: Some(Usage::new(10, completion_tokens)),
            model: "scripted".into(),
            cost: None,
        }
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let served = {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            requests.push(request);
            requests.len()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::NotConfigured(format!(
                    "script exhausted after {} responses",
                    served - 1
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_blocks_split_on_separator() {
        let provider = ScriptedProvider::from_script(
            "Let me look.\n<execute_bash>ls</execute_bash>\n---\n\n---\n<finish></finish>\n",
        );
        assert_eq!(provider.remaining(), 2);
    }

    #[tokio::test]
    async fn replays_in_order_then_errors() {
        let provider = ScriptedProvider::from_texts(["one", "two"]);
        let request = ProviderRequest {
            model: "m".into(),
            messages: vec![],
            temperature: 0.0,
            top_p: None,
            max_tokens: None,
            stop: vec![],
        };
        let first = provider.complete(request.clone()).await.unwrap();
        assert_eq!(first.choices, vec!["one"]);
        let second = provider.complete(request.clone()).await.unwrap();
        assert_eq!(second.choices, vec!["two"]);
        let err = provider.complete(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!err.is_retryable());
        assert_eq!(provider.calls(), 3);
    }
}
