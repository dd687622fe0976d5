//! `chatrecall usage` and `chatrecall pricing`.

use chatrecall_agent::validate_session_id;
use chatrecall_config::AppConfig;
use chatrecall_telemetry::{Ledger, RateTable, report};
use std::fmt::Write;
use std::sync::Arc;

/// Print the usage report for one session, or for all sessions.
pub async fn usage(session: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    print!("{}", usage_report(&config, session.as_deref()).await?);
    Ok(())
}

/// List available model pricing.
pub async fn pricing() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    print!("{}", pricing_table(&config.rate_table()));
    Ok(())
}

pub(crate) async fn usage_report(
    config: &AppConfig,
    session: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    let path = match session {
        Some(id) => {
            validate_session_id(id)?;
            config.session_usage_path(id)
        }
        None => config.global_usage_path(),
    };

    if !path.exists() {
        return Ok(format!("No usage recorded yet ({})\n", path.display()));
    }

    let ledger = Ledger::open(&path, Arc::new(config.rate_table())).await?;
    let summary = ledger.summarize().await?;
    Ok(report::render(&summary))
}

pub(crate) fn pricing_table(table: &RateTable) -> String {
    let models = table.models();
    let width = models.iter().map(String::len).max().unwrap_or(0).max("Model".len());

    let mut out = String::new();
    let _ = writeln!(out, "Model pricing (USD per 1M tokens)");
    let _ = writeln!(out, "{:<width$}  {:>10}  {:>10}", "Model", "Input", "Output");
    for name in &models {
        if let Some(p) = table.get(name) {
            let _ = writeln!(
                out,
                "{:<width$}  {:>10.3}  {:>10.3}",
                name, p.input_per_m, p.output_per_m
            );
        }
    }
    out
}
