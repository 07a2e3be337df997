//! The LLM client: timeout, retry with randomized exponential backoff,
//! and cost/token accounting on top of a raw provider.

use devloop_config::LlmConfig;
use devloop_core::error::ProviderError;
use devloop_core::{Message, Provider, ProviderRequest, ProviderResponse, Usage};
use devloop_telemetry::{MetricsHandle, PricingTable};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One completed LLM call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Candidate completions, never empty.
    pub choices: Vec<String>,
    pub usage: Option<Usage>,
    /// Cost in USD charged for this call.
    pub cost: f64,
}

impl LlmResponse {
    /// The first candidate.
    pub fn text(&self) -> &str {
        self.choices.first().map(String::as_str).unwrap_or_default()
    }
}

/// A provider bound to a model, sampling parameters and a metrics accumulator.
///
/// Parents and their delegates share one `Llm`, so cost accumulates in one place.
pub struct Llm {
    provider: Arc<dyn Provider>,
    config: LlmConfig,
    metrics: MetricsHandle,
    pricing: Arc<PricingTable>,
}

impl Llm {
    pub fn new(provider: Arc<dyn Provider>, config: LlmConfig) -> Self {
        Self {
            provider,
            config,
            metrics: MetricsHandle::new(),
            pricing: Arc::new(PricingTable::with_defaults()),
        }
    }

    /// Record into an existing accumulator instead of a fresh one.
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Ask the model for a completion.
    ///
    /// Transient failures (rate limit, connection, unavailable, timeout,
    /// empty response) are retried up to `num_retries` attempts in total.
    /// Anything else is returned immediately.
    pub async fn completion(
        &self,
        messages: Vec<Message>,
        stop: &[&str],
    ) -> Result<LlmResponse, ProviderError> {
        let request = ProviderRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_output_tokens,
            stop: stop.iter().map(|s| s.to_string()).collect(),
        };

        let max_attempts = self.config.num_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(request.clone()).await {
                Ok(response) => return Ok(self.record(response)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        provider = %self.provider.name(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let response = tokio::time::timeout(timeout, self.provider.complete(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "provider '{}' timed out after {}s",
                    self.provider.name(),
                    timeout.as_secs()
                ))
            })??;

        if response.choices.is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "provider '{}' returned no choices",
                self.provider.name()
            )));
        }
        Ok(response)
    }

    fn record(&self, response: ProviderResponse) -> LlmResponse {
        let cost = response.cost.unwrap_or_else(|| {
            response
                .usage
                .map(|u| self.pricing.compute_cost(&response.model, &u))
                .unwrap_or(0.0)
        });
        self.metrics.add_cost(response.model.clone(), cost);
        if let Some(usage) = &response.usage {
            self.metrics.add_usage(usage);
        }
        debug!(
            model = %response.model,
            cost,
            accumulated = self.metrics.accumulated_cost(),
            "LLM call recorded"
        );
        LlmResponse {
            choices: response.choices,
            usage: response.usage,
            cost,
        }
    }

    /// Random wait in `[min, min(max, min * 2^(attempt-1))]`.
    fn backoff(&self, attempt: u32) -> Duration {
        let min_ms = self.config.retry_min_wait_secs.saturating_mul(1000);
        let max_ms = self.config.retry_max_wait_secs.saturating_mul(1000).max(min_ms);
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ceiling = min_ms.saturating_mul(factor).clamp(min_ms, max_ms);
        Duration::from_millis(rand::rng().random_range(min_ms..=ceiling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;

    fn config() -> LlmConfig {
        LlmConfig {
            model: "openai/gpt-4o".into(),
            num_retries: 3,
            retry_min_wait_secs: 1,
            retry_max_wait_secs: 4,
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited { retry_after_secs: None }),
            Err(ProviderError::Connection("reset".into())),
            Ok(ScriptedProvider::response("hello")),
        ]));
        let llm = Llm::new(provider.clone(), config());

        let response = llm.completion(vec![Message::user("hi")], &[]).await.unwrap();
        assert_eq!(response.text(), "hello");
        assert_eq!(provider.calls(), 3);
        assert_eq!(llm.metrics().snapshot().llm_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_num_retries() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::ServiceUnavailable("503".into())),
            Err(ProviderError::ServiceUnavailable("503".into())),
            Err(ProviderError::ServiceUnavailable("503".into())),
            Ok(ScriptedProvider::response("never reached")),
        ]));
        let llm = Llm::new(provider.clone(), config());

        let err = llm.completion(vec![Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServiceUnavailable(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            Ok(ScriptedProvider::response("unused")),
        ]));
        let llm = Llm::new(provider.clone(), config());

        let err = llm.completion(vec![Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_choices_are_malformed() {
        let mut empty = ScriptedProvider::response("");
        empty.choices.clear();
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(empty)]));
        let llm = Llm::new(provider, LlmConfig { num_retries: 1, ..config() });

        let err = llm.completion(vec![Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let provider = Arc::new(
            ScriptedProvider::from_texts(["late"]).with_delay(Duration::from_secs(60)),
        );
        let llm = Llm::new(provider, LlmConfig { num_retries: 1, ..config() });

        let err = llm.completion(vec![Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn cost_prefers_reported_then_pricing() {
        let mut reported = ScriptedProvider::response("a");
        reported.cost = Some(0.5);
        let mut priced = ScriptedProvider::response("b");
        priced.model = "openai/gpt-4o".into();
        priced.usage = Some(Usage::new(1_000_000, 0));
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(reported), Ok(priced)]));
        let llm = Llm::new(provider, config());

        assert!((llm.completion(vec![], &[]).await.unwrap().cost - 0.5).abs() < 1e-12);
        assert!((llm.completion(vec![], &[]).await.unwrap().cost - 2.5).abs() < 1e-12);
        assert!((llm.metrics().accumulated_cost() - 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn stop_sequences_reach_provider() {
        let provider = Arc::new(ScriptedProvider::from_texts(["ok"]));
        let llm = Llm::new(provider.clone(), config());
        llm.completion(vec![Message::user("hi")], &["</execute_bash>"])
            .await
            .unwrap();
        let request = provider.last_request().unwrap();
        assert_eq!(request.stop, vec!["</execute_bash>".to_string()]);
        assert_eq!(request.model, "openai/gpt-4o");
    }

    #[test]
    fn backoff_stays_within_window() {
        let llm = Llm::new(Arc::new(ScriptedProvider::from_texts(["x"])), config());
        for attempt in 1..8 {
            let delay = llm.backoff(attempt);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(4));
        }
        assert!(llm.backoff(1) <= Duration::from_secs(1));
    }
}
