//! SQLite-backed, append-only token usage ledger.
//!
//! Uses a single table, `token_costs`. Triggers reject every UPDATE and
//! DELETE, so rows are immutable no matter who holds the connection.
//! There is no in-memory cache: `summarize()` always reads the table.

use crate::model::{ModelUsage, UsageRecord, UsageSummary, from_epoch_secs};
use crate::pricing::RateTable;
use chatrecall_core::LedgerError;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const IMMUTABLE_MESSAGE: &str = "modification not allowed";

/// An append-only ledger of billed provider calls.
pub struct Ledger {
    pool: SqlitePool,
    rates: Arc<RateTable>,
    location: String,
}

impl Ledger {
    /// Open (or create) a ledger file. Parent directories are created.
    pub async fn open(path: impl AsRef<Path>, rates: Arc<RateTable>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Storage(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        Self::connect(options, path.display().to_string(), rates).await
    }

    /// Open an in-process ephemeral ledger (useful for tests).
    pub async fn in_memory(rates: Arc<RateTable>) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| LedgerError::Storage(format!("Invalid SQLite path: {e}")))?;
        Self::connect(options, ":memory:".into(), rates).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        location: String,
        rates: Arc<RateTable>,
    ) -> Result<Self, LedgerError> {
        // Single writer per ledger; one connection kept alive for the
        // lifetime of the pool so in-memory databases survive idling.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to open SQLite: {e}")))?;

        let ledger = Self {
            pool,
            rates,
            location,
        };
        ledger.run_migrations().await?;
        info!(ledger = %ledger.location, "Token usage ledger ready");
        Ok(ledger)
    }

    /// Create the table and the immutability triggers.
    async fn run_migrations(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_costs (
                timestamp          INTEGER NOT NULL,
                model              TEXT NOT NULL,
                n_input_tokens     INTEGER NOT NULL CHECK (n_input_tokens >= 0),
                n_output_tokens    INTEGER NOT NULL CHECK (n_output_tokens >= 0),
                cost_input_tokens  REAL NOT NULL CHECK (cost_input_tokens >= 0),
                cost_output_tokens REAL NOT NULL CHECK (cost_output_tokens >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::MigrationFailed(format!("token_costs table: {e}")))?;

        for (name, event) in [
            ("prevent_token_costs_update", "UPDATE"),
            ("prevent_token_costs_delete", "DELETE"),
        ] {
            let sql = format!(
                "CREATE TRIGGER IF NOT EXISTS {name} BEFORE {event} ON token_costs \
                 BEGIN SELECT RAISE(ABORT, '{IMMUTABLE_MESSAGE}'); END"
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::MigrationFailed(format!("{name} trigger: {e}")))?;
        }

        debug!(ledger = %self.location, "Ledger migrations complete");
        Ok(())
    }

    /// Where this ledger lives (file path or `:memory:`).
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The rate snapshot this ledger costs rows with.
    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    /// Fail with `UnknownModel` unless `model` can be costed.
    pub fn ensure_known(&self, model: &str) -> Result<(), LedgerError> {
        self.rates.require(model).map(|_| ())
    }

    /// Append one usage row.
    ///
    /// A `None` model means nothing was billed and is a no-op.
    pub async fn record(
        &self,
        model: Option<&str>,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<Option<UsageRecord>, LedgerError> {
        let Some(model) = model else {
            return Ok(None);
        };

        let (input_cost, output_cost) = self.rates.costs(model, input_tokens, output_tokens)?;
        let record = UsageRecord {
            timestamp: Utc::now().timestamp(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
        };

        sqlx::query(
            r#"
            INSERT INTO token_costs (
                timestamp, model, n_input_tokens, n_output_tokens,
                cost_input_tokens, cost_output_tokens
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(record.timestamp)
        .bind(&record.model)
        .bind(i64::from(record.input_tokens))
        .bind(i64::from(record.output_tokens))
        .bind(record.input_cost)
        .bind(record.output_cost)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "INSERT"))?;

        debug!(
            ledger = %self.location,
            model,
            input_tokens,
            output_tokens,
            cost = record.total_cost(),
            "Recorded token usage"
        );
        Ok(Some(record))
    }

    /// Every row, in insertion order.
    pub async fn records(&self) -> Result<Vec<UsageRecord>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM token_costs ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("SELECT failed: {e}")))?;

        rows.iter().map(row_to_record).collect()
    }

    /// Aggregate usage per model plus a grand-total row.
    pub async fn summarize(&self) -> Result<UsageSummary, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT
                model,
                MIN(timestamp)          AS first_used,
                SUM(n_input_tokens)     AS input_tokens,
                SUM(n_output_tokens)    AS output_tokens,
                SUM(cost_input_tokens)  AS input_cost,
                SUM(cost_output_tokens) AS output_cost
            FROM token_costs
            GROUP BY model
            ORDER BY SUM(n_input_tokens + n_output_tokens) DESC, model ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Usage aggregation failed: {e}")))?;

        let by_model = rows
            .iter()
            .map(row_to_model_usage)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UsageSummary::from_rows(by_model))
    }
}

/// Fans every usage report out to several ledgers (per-session and
/// process-wide).
#[derive(Clone, Default)]
pub struct LedgerSet {
    ledgers: Vec<Arc<Ledger>>,
}

impl LedgerSet {
    pub fn new(ledgers: Vec<Arc<Ledger>>) -> Self {
        Self { ledgers }
    }

    pub fn push(&mut self, ledger: Arc<Ledger>) {
        self.ledgers.push(ledger);
    }

    /// Fail unless every ledger can cost `model`.
    pub fn ensure_known(&self, model: &str) -> Result<(), LedgerError> {
        self.ledgers
            .iter()
            .try_for_each(|ledger| ledger.ensure_known(model))
    }

    /// Record the same usage once in each ledger.
    pub async fn record(
        &self,
        model: Option<&str>,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<(), LedgerError> {
        for ledger in &self.ledgers {
            ledger.record(model, input_tokens, output_tokens).await?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Ledger>> {
        self.ledgers.iter()
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }
}

fn write_error(e: sqlx::Error, op: &str) -> LedgerError {
    match &e {
        sqlx::Error::Database(db) if db.message().contains(IMMUTABLE_MESSAGE) => {
            LedgerError::ImmutableRecord(format!("{op} on token_costs rejected"))
        }
        _ => LedgerError::Storage(format!("{op} failed: {e}")),
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| LedgerError::Storage(format!("{name} column: {e}")))
}

fn tokens(row: &SqliteRow, name: &str) -> Result<u32, LedgerError> {
    let value: i64 = column(row, name)?;
    u32::try_from(value).map_err(|_| LedgerError::Storage(format!("{name} out of range: {value}")))
}

fn total_tokens(row: &SqliteRow, name: &str) -> Result<u64, LedgerError> {
    let value: i64 = column(row, name)?;
    u64::try_from(value).map_err(|_| LedgerError::Storage(format!("{name} out of range: {value}")))
}

fn row_to_record(row: &SqliteRow) -> Result<UsageRecord, LedgerError> {
    Ok(UsageRecord {
        timestamp: column(row, "timestamp")?,
        model: column(row, "model")?,
        input_tokens: tokens(row, "n_input_tokens")?,
        output_tokens: tokens(row, "n_output_tokens")?,
        input_cost: column(row, "cost_input_tokens")?,
        output_cost: column(row, "cost_output_tokens")?,
    })
}

fn row_to_model_usage(row: &SqliteRow) -> Result<ModelUsage, LedgerError> {
    let first_used: i64 = column(row, "first_used")?;
    Ok(ModelUsage {
        model: column(row, "model")?,
        first_used: from_epoch_secs(first_used),
        input_tokens: total_tokens(row, "input_tokens")?,
        output_tokens: total_tokens(row, "output_tokens")?,
        input_cost: column(row, "input_cost")?,
        output_cost: column(row, "output_cost")?,
    })
}
