//! Embedding requests under the retry policy, with usage accounting.

use chatrecall_core::error::{Error, ProviderError, Result};
use chatrecall_core::provider::{EmbeddingRequest, Provider};
use chatrecall_providers::{RetryConfig, retry_with_backoff};
use chatrecall_telemetry::LedgerSet;
use std::sync::Arc;
use tracing::debug;

/// One embedding vector and the tokens billed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Turns text into vectors through a [`Provider`].
///
/// Every successful request is recorded once in each attached ledger under
/// the embedding model's name. Failed requests record nothing.
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
    retry: RetryConfig,
    ledgers: LedgerSet,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        retry: RetryConfig,
        ledgers: LedgerSet,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            retry,
            ledgers,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed `text` after trimming surrounding whitespace.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            inputs: vec![text.trim().to_string()],
        };

        let response = retry_with_backoff(
            &self.retry,
            || self.provider.embed(request.clone()),
            ProviderError::is_retryable,
        )
        .await
        .map_err(|e| Error::EmbeddingRequest {
            attempts: e.attempts,
            source: e.last_error,
        })?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::EmbeddingRequest {
                attempts: 1,
                source: ProviderError::MalformedResponse("no embedding returned".into()),
            })?;

        let usage = response.usage.ok_or_else(|| Error::EmbeddingRequest {
            attempts: 1,
            source: ProviderError::MalformedResponse("embedding response has no usage".into()),
        })?;
        let input_tokens = usage.prompt_tokens;
        let output_tokens = usage.output_tokens();

        self.ledgers
            .record(Some(&self.model), input_tokens, output_tokens)
            .await?;

        debug!(
            model = %self.model,
            dimensions = vector.len(),
            input_tokens,
            "Embedded text"
        );

        Ok(Embedding {
            vector,
            input_tokens,
            output_tokens,
        })
    }
}
