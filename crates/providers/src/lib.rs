//! LLM provider implementations for ChatRecall.
//!
//! Providers implement the `chatrecall_core::Provider` trait. Calls to them
//! are wrapped in the backoff policy from [`retry`].

pub mod openai_compat;
pub mod retry;

pub use openai_compat::{OPENAI_BASE_URL, OpenAiCompatProvider};
pub use retry::{RetryConfig, RetryError, retry_with_backoff};
