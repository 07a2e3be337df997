//! Cost and token accounting for devloop.
//!
//! [`MetricsHandle`] is the one object a parent controller and its delegates
//! mutate together: every LLM call records its cost into it, and the
//! controller's budget check reads it back. [`PricingTable`] estimates cost
//! when a provider does not report one.

pub mod metrics;
pub mod pricing;

pub use metrics::{Cost, Metrics, MetricsHandle};
pub use pricing::{ModelPricing, PricingTable};
