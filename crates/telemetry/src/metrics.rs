//! Accumulated LLM cost and token usage.

use chrono::{DateTime, Utc};
use devloop_core::Usage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::{Arc, PoisonError, RwLock};

/// Cost of one LLM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub model: String,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// Running totals for one task (a root agent plus all of its delegates).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accumulated_cost: f64,
    #[serde(default)]
    pub costs: Vec<Cost>,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub llm_calls: u64,
}

impl Metrics {
    pub fn add_cost(&mut self, model: impl Into<String>, cost: f64) {
        let model = model.into();
        self.accumulated_cost += cost;
        tracing::debug!(
            model = %model,
            cost = cost,
            accumulated = self.accumulated_cost,
            "LLM cost recorded"
        );
        self.costs.push(Cost {
            model,
            cost,
            timestamp: Utc::now(),
        });
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.llm_calls += 1;
    }

    /// Fold another set of totals into this one.
    pub fn merge(&mut self, other: &Metrics) {
        tracing::debug!(
            cost = other.accumulated_cost,
            calls = other.llm_calls,
            "Merging restored metrics"
        );
        self.accumulated_cost += other.accumulated_cost;
        self.costs.extend(other.costs.iter().cloned());
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.llm_calls += other.llm_calls;
    }
}

/// Shared, clonable handle to one [`Metrics`] accumulator.
///
/// Clones observe and mutate the same totals. Serializes as a snapshot of
/// the current values; deserializes into a fresh, unshared handle.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle(Arc<RwLock<Metrics>>);

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_metrics(metrics: Metrics) -> Self {
        Self(Arc::new(RwLock::new(metrics)))
    }

    pub fn add_cost(&self, model: impl Into<String>, cost: f64) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_cost(model, cost);
    }

    pub fn add_usage(&self, usage: &Usage) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_usage(usage);
    }

    pub fn merge(&self, other: &Metrics) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(other);
    }

    pub fn accumulated_cost(&self) -> f64 {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .accumulated_cost
    }

    pub fn snapshot(&self) -> Metrics {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether two handles share one accumulator.
    pub fn shares_with(&self, other: &MetricsHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Serialize for MetricsHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MetricsHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Metrics::deserialize(deserializer).map(Self::from_metrics)
    }
}
