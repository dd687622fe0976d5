//! # ChatRecall Core
//!
//! Domain types, traits, and error definitions for the ChatRecall
//! context-retrieval runtime. This crate has **no storage or network
//! dependencies**; it defines the model every other crate builds on.
//!
//! ## Design Philosophy
//!
//! External collaborators (chat completion, embeddings) are reached through
//! the [`Provider`] trait. Storage and accounting implementations live in
//! their own crates and share the error types defined here.

pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{Error, LedgerError, MemoryError, ProviderError, Result};
pub use message::{Message, MessageExchange, Role};
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
