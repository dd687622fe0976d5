//! The chat turn loop for ChatRecall.
//!
//! Each turn follows the same sequence:
//!
//! 1. **Select** relevant history for the user message
//! 2. **Assemble** the prompt (optional system prompt, history, directive, message)
//! 3. **Complete** via the configured provider, under the retry policy
//! 4. **Account** for every billed call in the session and process-wide ledgers
//! 5. **Append** the new exchange, with its embedding, to the exchange store
//!
//! A turn that fails at any step appends nothing to the exchange store.

pub mod context;
pub mod embedder;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use context::{
    CONTEXT_DIRECTIVE, ContextAssembler, EmbeddingContext, FullHistoryContext, HistorySelector,
    exchange_text, select_window,
};
pub use embedder::{Embedder, Embedding};
pub use session::{ChatSession, SessionOptions, TurnOutcome, retry_policy, validate_session_id};
