#![allow(dead_code)]

use async_trait::async_trait;
use chatrecall_core::error::ProviderError;
use chatrecall_core::message::Message;
use chatrecall_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use std::sync::Mutex;

/// Topic axes used to embed text: one dimension per keyword, plus a bias.
const TOPICS: [&str; 4] = ["rust", "python", "weather", "music"];

pub fn topic_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = TOPICS
        .iter()
        .map(|t| lower.matches(t).count() as f32)
        .collect();
    v.push(0.1);
    v
}

/// Replies with "echo: <last user message>" and embeds by topic keywords.
pub struct EchoProvider {
    pub requests: Mutex<Vec<ProviderRequest>>,
    pub embeds: Mutex<usize>,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            embeds: Mutex::new(0),
        }
    }

    pub fn last_prompt(&self) -> Vec<Message> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.requests.lock().unwrap().push(request);
        Ok(ProviderResponse {
            message: Message::assistant(format!("echo: {last}")),
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            }),
            model: "gpt-4".into(),
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        *self.embeds.lock().unwrap() += 1;
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| topic_embedding(t)).collect(),
            model: request.model,
            usage: Some(Usage {
                prompt_tokens: 8,
                completion_tokens: 0,
                total_tokens: 8,
            }),
        })
    }
}
