//! Built-in pricing table for the models ChatRecall bills.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. A table is an immutable value: overrides from config are
//! applied while building it, never afterwards, so every ledger row is
//! costed against the snapshot its ledger was opened with.

use chatrecall_core::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pseudo-model billed when the session keeps the full history instead of
/// requesting embeddings. Always priced at zero.
pub const FULL_HISTORY_MODEL: &str = "full-history";

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Cost of `tokens` input tokens.
    pub fn input_cost(&self, tokens: u32) -> f64 {
        tokens as f64 * self.input_per_m / 1_000_000.0
    }

    /// Cost of `tokens` output tokens.
    pub fn output_cost(&self, tokens: u32) -> f64 {
        tokens as f64 * self.output_per_m / 1_000_000.0
    }

    /// Combined cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        self.input_cost(input_tokens) + self.output_cost(output_tokens)
    }
}

/// Immutable model → price mapping.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    prices: HashMap<String, ModelPricing>,
}

impl RateTable {
    /// Create a pricing table with built-in model prices.
    ///
    /// Always contains the zero-cost [`FULL_HISTORY_MODEL`] sentinel.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Chat models ────────────────────────────────────────────
        prices.insert("gpt-3.5-turbo".into(), ModelPricing::new(1.5, 2.0));
        prices.insert("gpt-3.5-turbo-16k".into(), ModelPricing::new(1.0, 2.0));
        prices.insert("gpt-3.5-turbo-1106".into(), ModelPricing::new(1.0, 2.0));
        prices.insert("gpt-4".into(), ModelPricing::new(30.0, 60.0));
        prices.insert("gpt-4-1106-preview".into(), ModelPricing::new(30.0, 60.0));
        prices.insert("gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));

        // ── Embedding models ───────────────────────────────────────
        prices.insert("text-embedding-ada-002".into(), ModelPricing::new(0.1, 0.0));
        prices.insert("text-embedding-3-small".into(), ModelPricing::new(0.02, 0.0));
        prices.insert("text-embedding-3-large".into(), ModelPricing::new(0.13, 0.0));

        // ── Cost-free paths ────────────────────────────────────────
        prices.insert(FULL_HISTORY_MODEL.into(), ModelPricing::new(0.0, 0.0));

        Self { prices }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Return a table with `model` added or replaced.
    pub fn with(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.prices.insert(model.into(), pricing);
        self
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices.get(model).copied()
    }

    /// Pricing for a model, or `UnknownModel` when it is not priced.
    pub fn require(&self, model: &str) -> Result<ModelPricing, LedgerError> {
        self.get(model)
            .ok_or_else(|| LedgerError::UnknownModel(model.to_string()))
    }

    /// Input and output cost for a call, fixed at the table's current rates.
    pub fn costs(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<(f64, f64), LedgerError> {
        let pricing = self.require(model)?;
        Ok((
            pricing.input_cost(input_tokens),
            pricing.output_cost(output_tokens),
        ))
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
