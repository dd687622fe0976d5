//! History selection strategies.
//!
//! A session picks one [`HistorySelector`] at start-up. The selector decides
//! which stored exchanges become context for the next message and what
//! embedding, if any, is stored alongside a new exchange.

use crate::embedder::Embedder;
use async_trait::async_trait;
use chatrecall_core::error::Result;
use chatrecall_core::message::Message;
use chatrecall_memory::{ExchangeRecord, ExchangeStore, flatten, vector_search};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Chooses prior exchanges to send as context.
#[async_trait]
pub trait HistorySelector: Send + Sync {
    /// Short strategy name for logs.
    fn name(&self) -> &str;

    /// Messages from stored history relevant to `msg`, in prompt order.
    async fn select_relevant_history(&self, msg: &Message) -> Result<Vec<Message>>;

    /// Embedding to store with a freshly completed exchange.
    async fn embed_exchange(&self, exchange: &[Message]) -> Result<Option<Vec<f32>>>;
}

/// Sends the whole stored history and never embeds anything.
pub struct FullHistoryContext {
    store: Arc<ExchangeStore>,
}

impl FullHistoryContext {
    pub fn new(store: Arc<ExchangeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistorySelector for FullHistoryContext {
    fn name(&self) -> &str {
        "full-history"
    }

    async fn select_relevant_history(&self, _msg: &Message) -> Result<Vec<Message>> {
        let records = self.store.load_all().await?;
        Ok(flatten(&records))
    }

    async fn embed_exchange(&self, _exchange: &[Message]) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }
}

/// Sends the most similar and the most recent exchanges.
pub struct EmbeddingContext {
    store: Arc<ExchangeStore>,
    embedder: Embedder,
    similar: usize,
    recent: usize,
}

impl EmbeddingContext {
    pub fn new(store: Arc<ExchangeStore>, embedder: Embedder) -> Self {
        Self {
            store,
            embedder,
            similar: 5,
            recent: 2,
        }
    }

    /// Number of most similar exchanges to include.
    pub fn with_similar(mut self, k: usize) -> Self {
        self.similar = k;
        self
    }

    /// Number of most recent exchanges to include.
    pub fn with_recent(mut self, k: usize) -> Self {
        self.recent = k;
        self
    }
}

#[async_trait]
impl HistorySelector for EmbeddingContext {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn select_relevant_history(&self, msg: &Message) -> Result<Vec<Message>> {
        let query = self.embedder.embed(&msg.content).await?;
        let records = self.store.load_all().await?;
        let window = select_window(&records, &query.vector, self.similar, self.recent);

        debug!(
            stored = records.len(),
            selected = window.len(),
            similar = self.similar,
            recent = self.recent,
            "Selected history window"
        );

        Ok(flatten(window))
    }

    async fn embed_exchange(&self, exchange: &[Message]) -> Result<Option<Vec<f32>>> {
        let embedding = self.embedder.embed(&exchange_text(exchange)).await?;
        Ok(Some(embedding.vector))
    }
}

/// Render an exchange as `role: content` lines for embedding.
pub fn exchange_text(exchange: &[Message]) -> String {
    exchange
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().trim(), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pick the context window for a query vector.
///
/// The `similar` best-scoring records (storage order among themselves) come
/// first, then the last `recent` records. A record already taken is not
/// repeated, so overlapping windows yield fewer than `similar + recent`
/// records even when the history is that small.
pub fn select_window<'a>(
    records: &'a [ExchangeRecord],
    query: &[f32],
    similar: usize,
    recent: usize,
) -> Vec<&'a ExchangeRecord> {
    let mut most_similar: Vec<usize> = vector_search(records, query, similar)
        .into_iter()
        .map(|s| s.index)
        .collect();
    most_similar.sort_unstable();

    let recent_start = records.len().saturating_sub(recent);
    let mut seen = HashSet::new();

    most_similar
        .into_iter()
        .chain(recent_start..records.len())
        .map(|index| &records[index])
        .filter(|record| seen.insert(record.id))
        .collect()
}
