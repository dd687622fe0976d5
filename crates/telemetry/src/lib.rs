//! Token usage accounting for ChatRecall.
//!
//! Every billed provider call (embedding or completion) lands as one
//! append-only row in a SQLite ledger, with its cost fixed at insert time
//! from an immutable [`RateTable`]. Summaries group the rows by model and add
//! a grand-total row; [`report`] renders them as plain text.

pub mod ledger;
pub mod model;
pub mod pricing;
pub mod report;

pub use ledger::{Ledger, LedgerSet};
pub use model::{ModelUsage, TOTAL_LABEL, UsageRecord, UsageSummary};
pub use pricing::{FULL_HISTORY_MODEL, ModelPricing, RateTable};
