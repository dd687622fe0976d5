//! Context selection and assembly.
//!
//! A selector picks stored exchanges for the next message, either the
//! full history or a similarity-plus-recency window, and the assembler
//! wraps them with the answering directive.

pub mod assembler;
pub mod selector;
pub mod token;

pub use assembler::{CONTEXT_DIRECTIVE, ContextAssembler};
pub use selector::{
    EmbeddingContext, FullHistoryContext, HistorySelector, exchange_text, select_window,
};
