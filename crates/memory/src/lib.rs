//! Exchange storage for ChatRecall.
//!
//! An [`ExchangeStore`] is an append-only SQLite file of user/assistant
//! exchanges and their embeddings, pinned to a single embedding model.
//! [`vector`] holds the similarity math used to rank stored exchanges.

pub mod exchange;
pub mod sqlite;
pub mod vector;

pub use exchange::{EmbeddingModelPin, ExchangeRecord, flatten};
pub use sqlite::ExchangeStore;
pub use vector::{Scored, cosine_similarity, vector_search};
