//! Shared test helpers: a scripted provider and session fixtures.

use async_trait::async_trait;
use chatrecall_core::error::ProviderError;
use chatrecall_core::message::Message;
use chatrecall_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use std::collections::VecDeque;
use std::sync::Mutex;

type EmbedFn = Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>;

/// A provider that replays scripted completions and computes embeddings
/// with a fixed function. Scripted embedding failures are returned first.
pub struct ScriptedProvider {
    completions: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    embed_failures: Mutex<VecDeque<ProviderError>>,
    embed_fn: EmbedFn,
    embedding_usage: bool,
    requests: Mutex<Vec<ProviderRequest>>,
    embed_inputs: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            embed_failures: Mutex::new(VecDeque::new()),
            embed_fn: Box::new(|text| vec![1.0, text.len() as f32]),
            embedding_usage: true,
            requests: Mutex::new(Vec::new()),
            embed_inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_embed_fn(mut self, f: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        self.embed_fn = Box::new(f);
        self
    }

    pub fn reply(self, text: &str, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.completions
            .lock()
            .unwrap()
            .push_back(Ok(text_response(text, prompt_tokens, completion_tokens)));
        self
    }

    /// Script a completion that carries no usage block.
    pub fn reply_without_usage(self, text: &str) -> Self {
        let mut response = text_response(text, 0, 0);
        response.usage = None;
        self.completions.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Return embeddings without a usage block.
    pub fn without_embedding_usage(mut self) -> Self {
        self.embedding_usage = false;
        self
    }

    pub fn fail_completion(self, error: ProviderError) -> Self {
        self.completions.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn fail_embedding(self, error: ProviderError) -> Self {
        self.embed_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn embed_inputs(&self) -> Vec<String> {
        self.embed_inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no completion scripted"))
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        let mut inputs = self.embed_inputs.lock().unwrap();
        inputs.extend(request.inputs.iter().cloned());

        if let Some(error) = self.embed_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let embeddings: Vec<Vec<f32>> = request.inputs.iter().map(|t| (self.embed_fn)(t)).collect();
        let prompt_tokens = request.inputs.iter().map(|t| t.len() as u32).sum();
        Ok(EmbeddingResponse {
            embeddings,
            model: request.model,
            usage: self.embedding_usage.then_some(Usage {
                prompt_tokens,
                completion_tokens: 0,
                total_tokens: prompt_tokens,
            }),
        })
    }
}

pub fn text_response(text: &str, prompt_tokens: u32, completion_tokens: u32) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }),
        model: "gpt-4".into(),
    }
}
