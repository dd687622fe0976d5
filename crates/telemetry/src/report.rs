//! Plain-text rendering of a [`UsageSummary`].
//!
//! Read-only projection of the ledger; nothing here writes.

use crate::model::{ModelUsage, UsageSummary};
use std::fmt::Write;

pub const DESCRIPTION: &str = "Estimated token usage and associated costs";

pub const DISCLAIMER: &str = "Note: These are only estimates. Actual costs may vary.\n\
Please check your provider's usage dashboard to follow your actual usage and costs.";

/// Render the summary as an aligned table, total row last, followed by the
/// estimates disclaimer.
pub fn render(summary: &UsageSummary) -> String {
    let model_width = summary
        .rows()
        .map(|row| row.model.len())
        .max()
        .unwrap_or(0)
        .max("Model".len());

    let mut out = String::new();
    let _ = writeln!(out, "{DESCRIPTION}");
    let _ = writeln!(
        out,
        "{:<mw$}  {:<19}  {:>34}  {:>32}",
        "",
        "",
        "Tokens",
        "Cost ($)",
        mw = model_width
    );
    let _ = writeln!(
        out,
        "{:<mw$}  {:<19}  {:>10} {:>11} {:>11}  {:>10} {:>10} {:>10}",
        "Model",
        "First Used",
        "In",
        "Out",
        "Tot.",
        "In",
        "Out",
        "Tot.",
        mw = model_width
    );

    for row in summary.rows() {
        let _ = writeln!(out, "{}", render_row(row, model_width));
    }

    let _ = writeln!(out);
    out.push_str(DISCLAIMER);
    out.push('\n');
    out
}

fn render_row(row: &ModelUsage, model_width: usize) -> String {
    let first_used = row
        .first_used
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    format!(
        "{:<mw$}  {:<19}  {:>10} {:>11} {:>11}  {:>10.6} {:>10.6} {:>10.6}",
        row.model,
        first_used,
        row.input_tokens,
        row.output_tokens,
        row.total_tokens(),
        row.input_cost,
        row.output_cost,
        row.total_cost(),
        mw = model_width
    )
}
