//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Custom pricing can be added at
//! runtime.

use devloop_core::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for one call's token usage.
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_m
            + usage.completion_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table keyed by model name.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// A table pre-filled with the models agents are usually run against.
    pub fn with_defaults() -> Self {
        let prices = [
            ("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
            ("anthropic/claude-opus-4", ModelPricing::new(15.0, 75.0)),
            ("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0)),
            ("openai/gpt-4o", ModelPricing::new(2.5, 10.0)),
            ("openai/gpt-4o-mini", ModelPricing::new(0.15, 0.6)),
            ("openai/o3-mini", ModelPricing::new(1.1, 4.4)),
            ("google/gemini-2.0-flash", ModelPricing::new(0.1, 0.4)),
            ("deepseek/deepseek-v3", ModelPricing::new(0.27, 1.1)),
            ("deepseek/deepseek-r1", ModelPricing::new(0.55, 2.19)),
        ]
        .into_iter()
        .map(|(name, pricing)| (name.to_string(), pricing))
        .collect();

        Self {
            prices: RwLock::new(prices),
        }
    }

    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), pricing);
    }

    /// Look up pricing for a model.
    ///
    /// Tries an exact match, then matches on the bare model name so that
    /// `gpt-4o-mini-2024-07-18` resolves to `openai/gpt-4o-mini`. The
    /// longest matching bare name wins.
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        let bare_model = model.rsplit('/').next().unwrap_or(model).to_lowercase();
        prices
            .iter()
            .map(|(key, pricing)| (key.rsplit('/').next().unwrap_or(key).to_lowercase(), pricing))
            .filter(|(bare_key, _)| bare_model.starts_with(bare_key.as_str()))
            .max_by_key(|(bare_key, _)| bare_key.len())
            .map(|(_, pricing)| *pricing)
    }

    /// Cost of one call; unknown models cost nothing.
    pub fn compute_cost(&self, model: &str, usage: &Usage) -> f64 {
        self.lookup(model).map(|p| p.cost(usage)).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();
        // (1000 * 3.0 + 500 * 15.0) / 1M
        let cost = table.compute_cost("anthropic/claude-sonnet-4", &Usage::new(1000, 500));
        assert!((cost - 0.0105).abs() < 1e-10);
    }

    #[test]
    fn versioned_name_matches_longest_prefix() {
        let table = PricingTable::with_defaults();
        let mini = table.lookup("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(mini, ModelPricing::new(0.15, 0.6));
        let full = table.lookup("gpt-4o-2024-08-06").unwrap();
        assert_eq!(full, ModelPricing::new(2.5, 10.0));
    }

    #[test]
    fn unknown_model_is_free() {
        let table = PricingTable::with_defaults();
        assert_eq!(table.compute_cost("unknown/model-xyz", &Usage::new(1000, 500)), 0.0);
    }

    #[test]
    fn custom_pricing_overrides() {
        let table = PricingTable::empty();
        assert!(table.is_empty());
        table.set("custom/model", ModelPricing::new(1.0, 2.0));
        let cost = table.compute_cost("custom/model", &Usage::new(1_000_000, 1_000_000));
        assert!((cost - 3.0).abs() < 1e-10);
    }
}
