//! Cost accounting for the spend cap.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::model::Usage;

/// Per-model prices, USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input_cost_per_1k: input,
            output_cost_per_1k: output,
        }
    }

    /// Price of a model, matched on its bare name. More specific names are
    /// checked first so `gpt-4o-mini` is not billed as `gpt-4o`.
    pub fn for_model(model: &str) -> Option<Self> {
        let m = model.rsplit('/').next().unwrap_or(model).to_lowercase();
        if m.starts_with("gpt-4o-mini") {
            Some(Self::new(0.00015, 0.0006))
        } else if m.starts_with("gpt-4o") {
            Some(Self::new(0.005, 0.015))
        } else if m.starts_with("gpt-4-turbo")
            || m.starts_with("gpt-4-1106")
            || m.starts_with("gpt-4-0125")
            || m.starts_with("gpt-4-vision")
        {
            Some(Self::new(0.01, 0.03))
        } else if m.starts_with("gpt-4-32k") {
            Some(Self::new(0.06, 0.12))
        } else if m.starts_with("gpt-4") {
            Some(Self::new(0.03, 0.06))
        } else if m.starts_with("gpt-3.5-turbo") {
            Some(Self::new(0.0005, 0.0015))
        } else {
            None
        }
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// Running total of what a client has spent. Clones share the total.
#[derive(Debug, Clone, Default)]
pub struct SpendLedger {
    spent: Arc<Mutex<f64>>,
}

impl SpendLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total recorded so far, USD.
    pub fn spent(&self) -> f64 {
        *self.spent.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add the cost of `usage` on `model`; returns the cost added.
    /// Models without a known price cost nothing.
    pub fn record(&self, model: &str, usage: &Usage) -> f64 {
        let Some(pricing) = ModelPricing::for_model(model) else {
            debug!(model, "no pricing for model, spend not recorded");
            return 0.0;
        };
        let cost = pricing.cost(usage);
        let mut spent = self.spent.lock().unwrap_or_else(|e| e.into_inner());
        *spent += cost;
        debug!(model, cost, total = *spent, "recorded spend");
        cost
    }

    /// `true` once the recorded total goes over `budget`.
    pub fn exhausted(&self, budget: f64) -> bool {
        self.spent() > budget
    }
}
