//! Data model for ledger rows and aggregated usage summaries.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Label of the synthesized grand-total row.
pub const TOTAL_LABEL: &str = "Total";

// ── Ledger row ────────────────────────────────────────────────────────────

/// One billed provider call, costed at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Model the call was billed against.
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Cost of the input tokens in USD.
    pub input_cost: f64,
    /// Cost of the output tokens in USD.
    pub output_cost: f64,
}

impl UsageRecord {
    pub fn total_cost(&self) -> f64 {
        self.input_cost + self.output_cost
    }
}

// ── Aggregated views ──────────────────────────────────────────────────────

/// Usage aggregated over every row of one model (or over all rows, for the
/// total row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Model name, or [`TOTAL_LABEL`].
    pub model: String,
    /// Earliest row timestamp. `None` on the total row.
    pub first_used: Option<DateTime<Utc>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
}

impl ModelUsage {
    pub(crate) fn empty_total() -> Self {
        Self {
            model: TOTAL_LABEL.into(),
            first_used: None,
            input_tokens: 0,
            output_tokens: 0,
            input_cost: 0.0,
            output_cost: 0.0,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn total_cost(&self) -> f64 {
        self.input_cost + self.output_cost
    }

    /// Column-wise accumulate `other` into `self`.
    pub(crate) fn absorb(&mut self, other: &ModelUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.input_cost += other.input_cost;
        self.output_cost += other.output_cost;
    }
}

/// Per-model usage plus a grand-total row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// One row per distinct model, most tokens first.
    pub by_model: Vec<ModelUsage>,
    /// Column-wise sum of `by_model`, labelled [`TOTAL_LABEL`].
    pub total: ModelUsage,
}

impl UsageSummary {
    pub(crate) fn from_rows(by_model: Vec<ModelUsage>) -> Self {
        let mut total = ModelUsage::empty_total();
        for row in &by_model {
            total.absorb(row);
        }
        Self { by_model, total }
    }

    /// The row for `model`, if any usage was recorded for it.
    pub fn get(&self, model: &str) -> Option<&ModelUsage> {
        self.by_model.iter().find(|row| row.model == model)
    }

    /// Every row in report order: models first, total last.
    pub fn rows(&self) -> impl Iterator<Item = &ModelUsage> {
        self.by_model.iter().chain(std::iter::once(&self.total))
    }

    pub fn is_empty(&self) -> bool {
        self.by_model.is_empty()
    }
}

/// Convert a stored epoch-seconds value to a UTC datetime.
pub(crate) fn from_epoch_secs(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
