//! Stored exchange rows and the embedding-model pin.

use chatrecall_core::{Message, MessageExchange};
use serde::{Deserialize, Serialize};

/// One stored user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Storage identity; increases with insertion order.
    pub id: i64,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Chat model that produced the reply.
    pub chat_model: String,
    /// The exchange's messages in their original order.
    pub message_exchange: MessageExchange,
    /// Embedding of the exchange. Empty when the context mode does not use
    /// embeddings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl ExchangeRecord {
    pub fn messages(&self) -> &[Message] {
        &self.message_exchange
    }
}

/// The single embedding model an exchange store is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelPin {
    /// Seconds since the Unix epoch of the first write.
    pub created_at: i64,
    pub embedding_model: String,
}

/// Flatten records into one message sequence, each exchange expanded in
/// its internal order.
pub fn flatten<'a, I>(records: I) -> Vec<Message>
where
    I: IntoIterator<Item = &'a ExchangeRecord>,
{
    records
        .into_iter()
        .flat_map(|record| record.message_exchange.iter().cloned())
        .collect()
}
