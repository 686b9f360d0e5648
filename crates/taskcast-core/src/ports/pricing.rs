//! Pricing port - model label から単価を引く
//!
//! The real table lives outside this crate; handlers pass one into
//! `ProgressTracker::record_usage`.

use std::collections::HashMap;

pub trait PricingTable: Send + Sync {
    /// Cost of one unit (token) for `model`, if known.
    fn cost_per_unit(&self, model: &str) -> Option<f64>;
}

/// In-memory table with an optional fallback rate for unknown models.
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    rates: HashMap<String, f64>,
    fallback: Option<f64>,
}

impl StaticPricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, model: impl Into<String>, cost_per_unit: f64) -> Self {
        self.rates.insert(model.into(), cost_per_unit);
        self
    }

    pub fn with_fallback(mut self, cost_per_unit: f64) -> Self {
        self.fallback = Some(cost_per_unit);
        self
    }
}

impl PricingTable for StaticPricing {
    fn cost_per_unit(&self, model: &str) -> Option<f64> {
        self.rates.get(model).copied().or(self.fallback)
    }
}
